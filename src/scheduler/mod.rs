//! Boundary to the cluster scheduler.
//!
//! The provisioning core only needs three capabilities from a scheduler:
//! submit a workload, list the live members carrying a label, and delete a
//! workload. [`Scheduler`] captures exactly that so the control plane can be
//! swapped for an in-memory fake in tests.
//!
//! # Components
//!
//! - [`Scheduler`]: the capability trait
//! - [`MemberStatus`] / [`MemberPhase`]: what a status query returns per member
//! - [`KubeScheduler`]: Kubernetes implementation (Deployments + Pods)

pub mod kubernetes;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use kubernetes::KubeScheduler;

/// Lifecycle phase of a single scheduled member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MemberPhase {
    Pending,
    Running,
    Failed,
    Unknown,
}

impl MemberPhase {
    /// Map a scheduler-reported phase string. Anything unrecognised,
    /// including terminal-success phases, is `Unknown`.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => MemberPhase::Pending,
            "Running" => MemberPhase::Running,
            "Failed" => MemberPhase::Failed,
            _ => MemberPhase::Unknown,
        }
    }
}

impl fmt::Display for MemberPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberPhase::Pending => write!(f, "pending"),
            MemberPhase::Running => write!(f, "running"),
            MemberPhase::Failed => write!(f, "failed"),
            MemberPhase::Unknown => write!(f, "unknown"),
        }
    }
}

/// Point-in-time status of one member, as returned by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberStatus {
    pub name: String,
    pub phase: MemberPhase,
    pub address: Option<String>,
}

impl MemberStatus {
    pub fn new(name: impl Into<String>, phase: MemberPhase, address: Option<String>) -> Self {
        Self {
            name: name.into(),
            phase,
            address,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == MemberPhase::Running
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(addr) => write!(f, "{}={}@{}", self.name, self.phase, addr),
            None => write!(f, "{}={}", self.name, self.phase),
        }
    }
}

/// A rendered workload document ready for submission.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    /// Workload name, also the label its members carry.
    pub name: String,
    /// Rendered document text.
    pub document: String,
    /// Where the rendered document was written for auditing.
    pub path: PathBuf,
}

/// How dependents are removed when a workload is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadePolicy {
    /// Members are removed before the workload itself is considered gone.
    Foreground,
    Background,
    Orphan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    pub grace_period: Duration,
    pub cascade: CascadePolicy,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            cascade: CascadePolicy::Foreground,
        }
    }
}

/// Capability set the provisioning core needs from a cluster scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submit a workload. Returns once the control plane accepted it; no
    /// member is guaranteed to be running yet.
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<()>;

    /// Live status of every member currently carrying `label`. May be empty
    /// or partial relative to the expected member count.
    async fn member_statuses(&self, label: &str) -> Result<Vec<MemberStatus>>;

    /// Delete a workload. Returns `ProvisionError::NotFound` when it is
    /// already gone.
    async fn delete_workload(&self, name: &str, options: DeleteOptions) -> Result<()>;
}
