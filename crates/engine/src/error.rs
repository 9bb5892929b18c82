// SPDX-License-Identifier: MIT

//! Engine error type.

use quaero_core::{CoreError, ErrorKind, JobId};
use quaero_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid config for step {step:?}: {message}")]
    InvalidConfig { step: String, message: String },

    #[error("no manager registered for action type {0:?}")]
    NoManager(String),

    #[error("definition {0:?} not found")]
    DefinitionNotFound(String),

    #[error("step {step:?} failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn invalid_config(step: &str, message: impl Into<String>) -> Self {
        EngineError::InvalidConfig { step: step.to_string(), message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Core(e) => e.kind,
            EngineError::Storage(e) => e.kind(),
            EngineError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            EngineError::NoManager(_) => ErrorKind::NoHandler,
            EngineError::DefinitionNotFound(_) => ErrorKind::NotFound,
            EngineError::StepFailed { .. } => ErrorKind::StepFailed,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Flatten into a [`CoreError`] correlated to a job.
    pub fn into_core(self, job_id: JobId) -> CoreError {
        match self {
            EngineError::Core(e) => e.with_job(job_id),
            EngineError::Storage(e) => e.into_core(job_id),
            other => CoreError::new(other.kind(), other.to_string()).with_job(job_id),
        }
    }
}
