// SPDX-License-Identifier: MIT

//! Storage error type, mapped onto the surface-visible error kinds.

use quaero_core::{CoreError, ErrorKind, JobId, JobStatus};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage: {0}")]
    Io(String),

    #[error("storage codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid transition for {job_id}: {from} -> {to}")]
    InvalidTransition { job_id: JobId, from: JobStatus, to: JobStatus },

    #[error("metadata patch for {0} still conflicting after {1} attempts")]
    PatchConflict(JobId, u32),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StorageError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StorageError::NotFound(what.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        StorageError::Io(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Io(_) | StorageError::Codec(_) | StorageError::PatchConflict(..) => {
                ErrorKind::Storage
            }
            StorageError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            StorageError::Core(e) => e.kind,
        }
    }

    /// Flatten into a [`CoreError`] correlated to a job.
    pub fn into_core(self, job_id: JobId) -> CoreError {
        match self {
            StorageError::Core(e) => e.with_job(job_id),
            other => CoreError::new(other.kind(), other.to_string()).with_job(job_id),
        }
    }
}
