// SPDX-License-Identifier: MIT

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::{Event, JobId, JobStatus, QueueJob, PARENT_TYPE};

// ── Proptest strategies ─────────────────────────────────────────────────

/// Proptest strategies for core state machine types.
pub mod strategies {
    use crate::job::JobStatus;
    use proptest::prelude::*;

    pub fn job_status() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Pending),
            Just(JobStatus::Queued),
            Just(JobStatus::Running),
            Just(JobStatus::Completed),
            Just(JobStatus::Failed),
            Just(JobStatus::Cancelled),
        ]
    }
}

// ── Record factory functions ────────────────────────────────────────────

pub fn parent_job(id: &str, name: &str) -> QueueJob {
    QueueJob::builder().id(id).job_type(PARENT_TYPE).name(name).build()
}

pub fn child_job(id: &str, parent_id: &str, job_type: &str) -> QueueJob {
    QueueJob::builder().id(id).parent_id(parent_id).job_type(job_type).build()
}

// ── Event factory functions ─────────────────────────────────────────────

pub fn child_status_event(job_id: &str, parent_id: &str, from: JobStatus, to: JobStatus) -> Event {
    Event::ChildStatusChange {
        job_id: JobId::from_string(job_id),
        parent_id: JobId::from_string(parent_id),
        from,
        to,
        error: None,
    }
}

pub fn document_saved_event(job_id: &str, parent_id: &str, document_id: &str) -> Event {
    Event::DocumentSaved {
        job_id: JobId::from_string(job_id),
        parent_id: Some(JobId::from_string(parent_id)),
        document_id: document_id.to_string(),
    }
}
