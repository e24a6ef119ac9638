//! Error types for the job registry.

use thiserror::Error;

use crate::types::JobStatus;

/// Errors that may occur while mutating the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}
