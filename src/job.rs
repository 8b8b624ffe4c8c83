use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{ProvisionError, Result};

const MAX_LABEL_LEN: usize = 63;

/// Parameters of one distributed job. Built by the caller before
/// provisioning and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    pub job_id: String,
    /// Workload name and member label.
    pub label: String,
    pub node_count: u32,
    pub gpu_count: Option<u32>,
    pub slots_per_node: u32,
    pub working_dir: PathBuf,
}

impl JobSpec {
    /// A single-node, single-slot job labelled after its id.
    pub fn new(job_id: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let job_id = job_id.into();
        Self {
            label: label_for(&job_id),
            job_id,
            node_count: 1,
            gpu_count: None,
            slots_per_node: 1,
            working_dir: working_dir.into(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_nodes(mut self, node_count: u32) -> Self {
        self.node_count = node_count;
        self
    }

    pub fn with_gpus(mut self, gpu_count: u32) -> Self {
        self.gpu_count = Some(gpu_count);
        self
    }

    pub fn with_slots(mut self, slots_per_node: u32) -> Self {
        self.slots_per_node = slots_per_node;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Reject specs the scheduler or the peer file could not represent.
    pub fn validate(&self) -> Result<()> {
        if self.job_id.trim().is_empty() {
            return Err(ProvisionError::Validation("job_id must not be empty".into()));
        }
        if self.node_count < 1 {
            return Err(ProvisionError::Validation(format!(
                "node_count must be at least 1 (job {})",
                self.job_id
            )));
        }
        if self.slots_per_node < 1 {
            return Err(ProvisionError::Validation(format!(
                "slots_per_node must be at least 1 (job {})",
                self.job_id
            )));
        }
        validate_label(&self.label)
    }
}

/// Default label for a job id.
pub fn label_for(job_id: &str) -> String {
    format!("mpi-{}", job_id)
}

/// Label values: 1-63 chars of `[A-Za-z0-9._-]`, alphanumeric at both ends.
fn validate_label(label: &str) -> Result<()> {
    let invalid = |why: &str| Err(ProvisionError::Validation(format!("label {:?} {}", label, why)));

    if label.is_empty() {
        return invalid("must not be empty");
    }
    if label.len() > MAX_LABEL_LEN {
        return invalid("is longer than 63 characters");
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return invalid("may only contain alphanumerics, '-', '_' and '.'");
    }
    let bytes = label.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return invalid("must start and end with an alphanumeric character");
    }
    Ok(())
}
