//! Workload template rendering.
//!
//! Templates are plain text with `$field$` placeholders. The recognised
//! fields are a fixed set:
//!
//! | Placeholder    | Value                      |
//! |----------------|----------------------------|
//! | `$name$`       | job label                  |
//! | `$label$`      | job label                  |
//! | `$node_count$` | node count, decimal        |
//! | `$gpu_count$`  | gpu count, decimal         |
//!
//! Any other `$...$` token is left untouched. A recognised placeholder whose
//! value the job does not supply is a validation error.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::job::JobSpec;
use crate::scheduler::WorkloadSpec;

/// File name of the rendered spec inside the job's working directory.
pub const WORKLOAD_SPEC_FILE: &str = "mpi-nodes.yaml";

/// A loaded workload template.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    source: Option<PathBuf>,
    text: String,
}

impl TemplateRenderer {
    /// Read a template from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ProvisionError::TemplateRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            source: Some(path.to_path_buf()),
            text,
        })
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            source: None,
            text: text.into(),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn render(&self, job: &JobSpec) -> Result<String> {
        render(&self.text, job)
    }

    /// Render for `job` and write the result to
    /// `<working_dir>/mpi-nodes.yaml`, replacing any earlier render.
    pub fn render_to_dir(&self, job: &JobSpec) -> Result<WorkloadSpec> {
        let document = self.render(job)?;
        let path = workload_spec_path(job.working_dir());
        fs::write(&path, &document).map_err(|source| ProvisionError::TemplateWrite {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(job_id = %job.job_id, path = %path.display(), "Workload spec rendered");

        Ok(WorkloadSpec {
            name: job.label.clone(),
            document,
            path,
        })
    }
}

pub fn workload_spec_path(working_dir: &Path) -> PathBuf {
    working_dir.join(WORKLOAD_SPEC_FILE)
}

/// Substitute the job's values into `template`.
pub fn render(template: &str, job: &JobSpec) -> Result<String> {
    let fields = [
        ("name", Some(job.label.clone())),
        ("label", Some(job.label.clone())),
        ("node_count", Some(job.node_count.to_string())),
        ("gpu_count", job.gpu_count.map(|n| n.to_string())),
    ];

    let mut rendered = template.to_string();
    for (field, value) in fields {
        let token = format!("${}$", field);
        if !rendered.contains(&token) {
            continue;
        }
        match value {
            Some(value) => rendered = rendered.replace(&token, &value),
            None => {
                return Err(ProvisionError::Validation(format!(
                    "template requires {} but job {} does not set it",
                    field, job.job_id
                )))
            }
        }
    }
    Ok(rendered)
}
