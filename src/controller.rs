use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result};
use crate::hostfile::{hostfile_path, write_hostfile};
use crate::job::JobSpec;
use crate::readiness::ReadinessPoller;
use crate::scheduler::{DeleteOptions, MemberStatus, Scheduler};
use crate::template::TemplateRenderer;

/// Result of a successful provision.
#[derive(Debug, Clone, Serialize)]
pub struct Provisioned {
    pub job_id: String,
    pub label: String,
    /// Published peer file, the hand-off to the distributed job.
    pub hostfile: PathBuf,
    /// Rendered workload spec kept for auditing.
    pub workload_spec: PathBuf,
    pub members: Vec<MemberStatus>,
    pub rounds: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Teardown {
    Deleted,
    /// The workload was already gone.
    AlreadyAbsent,
}

/// Provisions and tears down job workloads against one scheduler.
///
/// One controller can serve many jobs concurrently as long as their labels
/// differ; a label already being provisioned is rejected. Failed provisions
/// are not rolled back: the rendered spec and any created workload stay in
/// place until the caller runs [`JobController::teardown`].
pub struct JobController {
    scheduler: Arc<dyn Scheduler>,
    config: ProvisionConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl JobController {
    pub fn new(scheduler: Arc<dyn Scheduler>, config: ProvisionConfig) -> Self {
        Self {
            scheduler,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Whether a provision for `label` is currently running.
    pub fn is_in_flight(&self, label: &str) -> bool {
        self.in_flight.lock().contains(label)
    }

    /// Render, create, wait for readiness, then publish the hostfile.
    ///
    /// Cancelling `cancel` aborts the readiness wait without deleting the
    /// workload.
    pub async fn provision(&self, job: &JobSpec, cancel: &CancellationToken) -> Result<Provisioned> {
        job.validate()?;
        let _claim = LabelClaim::acquire(&self.in_flight, &job.label)?;

        let result = self.run_provision(job, cancel).await;
        if let Err(e) = &result {
            tracing::error!(
                job_id = %job.job_id,
                label = %job.label,
                error = %e,
                "Provision failed, workload left in place for teardown"
            );
        }
        result
    }

    async fn run_provision(&self, job: &JobSpec, cancel: &CancellationToken) -> Result<Provisioned> {
        let started_at = Utc::now();
        tracing::info!(
            job_id = %job.job_id,
            label = %job.label,
            nodes = job.node_count,
            gpus = ?job.gpu_count,
            slots = job.slots_per_node,
            "Provisioning job"
        );

        let renderer = TemplateRenderer::load(&self.config.template_path)?;
        let spec = renderer.render_to_dir(job)?;

        self.scheduler.create_workload(&spec).await?;
        tracing::info!(job_id = %job.job_id, workload = %spec.name, "Workload submitted");

        let poller = ReadinessPoller::new(
            self.scheduler.clone(),
            self.config.poll_interval,
            self.config.timeout,
        );
        let ready = poller
            .wait_until_ready(&job.label, job.node_count as usize, cancel)
            .await?;

        let hostfile = hostfile_path(job.working_dir());
        write_hostfile(&ready.members, job.slots_per_node, &hostfile)?;

        tracing::info!(
            job_id = %job.job_id,
            hostfile = %hostfile.display(),
            members = ready.members.len(),
            "Job provisioned"
        );

        Ok(Provisioned {
            job_id: job.job_id.clone(),
            label: job.label.clone(),
            hostfile,
            workload_spec: spec.path,
            members: ready.members,
            rounds: ready.rounds,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Delete the job's workload with a graceful, foreground-cascading
    /// delete. A workload that is already gone is not an error.
    pub async fn teardown(&self, job_id: &str, label: &str) -> Result<Teardown> {
        teardown_workload(
            self.scheduler.as_ref(),
            job_id,
            label,
            self.config.delete_options(),
        )
        .await
    }
}

/// Delete the workload named `label`, treating an absent workload as already
/// torn down. Needs no template or readiness settings, so a standalone
/// teardown can call it with just a scheduler.
pub async fn teardown_workload(
    scheduler: &dyn Scheduler,
    job_id: &str,
    label: &str,
    options: DeleteOptions,
) -> Result<Teardown> {
    match scheduler.delete_workload(label, options).await {
        Ok(()) => {
            tracing::info!(job_id, label, "Workload torn down");
            Ok(Teardown::Deleted)
        }
        Err(ProvisionError::NotFound(name)) => {
            tracing::warn!(job_id, workload = %name, "Workload already absent");
            Ok(Teardown::AlreadyAbsent)
        }
        Err(e) => Err(e),
    }
}

/// Holds a label in the in-flight set; released on drop.
struct LabelClaim {
    in_flight: Arc<Mutex<HashSet<String>>>,
    label: String,
}

impl LabelClaim {
    fn acquire(in_flight: &Arc<Mutex<HashSet<String>>>, label: &str) -> Result<Self> {
        if !in_flight.lock().insert(label.to_string()) {
            return Err(ProvisionError::Validation(format!(
                "label {} is already being provisioned",
                label
            )));
        }
        Ok(Self {
            in_flight: in_flight.clone(),
            label: label.to_string(),
        })
    }
}

impl Drop for LabelClaim {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.label);
    }
}
