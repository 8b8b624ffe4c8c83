pub mod config;
pub mod controller;
pub mod error;
pub mod hostfile;
pub mod job;
pub mod readiness;
pub mod scheduler;
pub mod shutdown;
pub mod template;

pub use controller::{JobController, Provisioned, Teardown};
pub use error::{ProvisionError, Result};
pub use job::JobSpec;
