// SPDX-License-Identifier: MIT

//! Error kinds surfaced by the job execution engine.

use crate::id::JobId;
use serde::{Deserialize, Serialize};

/// Classification of a failure, visible to callers and persisted with
/// terminal job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Entity missing
    NotFound,
    /// Step or definition validation failed
    InvalidConfig,
    /// Status state-machine violation
    InvalidTransition,
    /// Parent record carries a non-canonical type tag
    InvalidJobType,
    /// Underlying KV/disk failure
    Storage,
    /// Queue message of an unregistered job type
    NoHandler,
    /// Queue redelivery limit hit
    MaxRetriesExceeded,
    /// Parent or worker exceeded its deadline
    Timeout,
    /// Explicit cancel
    Cancelled,
    /// Subscriber errored during event dispatch
    EventHandler,
    /// A definition step failed and the tolerance policy aborted the chain
    StepFailed,
}

crate::simple_display! {
    ErrorKind {
        NotFound => "not_found",
        InvalidConfig => "invalid_config",
        InvalidTransition => "invalid_transition",
        InvalidJobType => "invalid_job_type",
        Storage => "storage",
        NoHandler => "no_handler",
        MaxRetriesExceeded => "max_retries_exceeded",
        Timeout => "timeout",
        Cancelled => "cancelled",
        EventHandler => "event_handler",
        StepFailed => "step_failed",
    }
}

/// An error with a surface-visible [`ErrorKind`] and optional job correlation.
///
/// Serializable so terminal errors can live in job metadata and events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, job_id: None, message: message.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, what)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Attach the job this error belongs to.
    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
