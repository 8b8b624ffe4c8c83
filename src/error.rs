use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::scheduler::{MemberPhase, MemberStatus};

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Failed to read template {path:?}: {source}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write workload spec {path:?}: {source}")]
    TemplateWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Scheduler rejected workload spec: {0}")]
    InvalidWorkloadSpec(String),

    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error("Workload {label} not ready after {waited:?} ({} members observed)", .snapshot.len())]
    ReadinessTimeout {
        label: String,
        waited: Duration,
        snapshot: Vec<MemberStatus>,
    },

    #[error("Member {member} of workload {label} failed")]
    MemberFailed {
        label: String,
        member: String,
        snapshot: Vec<MemberStatus>,
    },

    #[error("Readiness wait for {label} cancelled")]
    Cancelled {
        label: String,
        snapshot: Vec<MemberStatus>,
    },

    #[error("Member {member} ({phase}) has no usable network address")]
    MissingAddress { member: String, phase: MemberPhase },

    #[error("Failed to publish peer file {path:?}: {source}")]
    PeerFileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workload not found: {0}")]
    NotFound(String),
}

impl ProvisionError {
    /// Only scheduler availability problems are worth retrying by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProvisionError::SchedulerUnavailable(_))
    }

    /// Last member statuses observed before the error, if the error carries them.
    pub fn snapshot(&self) -> Option<&[MemberStatus]> {
        match self {
            ProvisionError::ReadinessTimeout { snapshot, .. }
            | ProvisionError::MemberFailed { snapshot, .. }
            | ProvisionError::Cancelled { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
