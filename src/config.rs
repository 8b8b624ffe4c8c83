use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::{CascadePolicy, DeleteOptions};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_LABEL_KEY: &str = "app";

/// Settings shared by every job a controller provisions.
///
/// No `Default`: the readiness timeout is always chosen by the caller.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Workload template, read once per provision.
    pub template_path: PathBuf,
    /// Scheduler namespace workloads are created in.
    pub namespace: String,
    /// Label key members are selected by; the job label is the value.
    pub label_key: String,
    /// Delay between readiness polls.
    pub poll_interval: Duration,
    /// Upper bound on the readiness wait.
    pub timeout: Duration,
    /// Time members get to exit cleanly on teardown.
    pub grace_period: Duration,
}

impl ProvisionConfig {
    pub fn new(template_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            template_path: template_path.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            label_key: DEFAULT_LABEL_KEY.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_label_key(mut self, label_key: impl Into<String>) -> Self {
        self.label_key = label_key.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Teardown always cascades in the foreground.
    pub fn delete_options(&self) -> DeleteOptions {
        DeleteOptions {
            grace_period: self.grace_period,
            cascade: CascadePolicy::Foreground,
        }
    }
}
