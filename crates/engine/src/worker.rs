// SPDX-License-Identifier: MIT

//! Worker contract: drain queue messages of one job type and execute the
//! unit of work.

use crate::job_logger::JobLogger;
use quaero_core::{CoreError, Event, EventSink, QueueJob};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-execution dependencies handed to a worker.
pub struct WorkerContext {
    /// Cancelled on shutdown, parent timeout, or explicit job cancel.
    /// Workers must react promptly.
    pub cancel: CancellationToken,
    pub logger: JobLogger,
    pub events: Arc<dyn EventSink>,
}

impl WorkerContext {
    /// Publish `document:saved` for one produced artifact.
    ///
    /// Document ids must be stable across retries: the parent monitor
    /// collapses duplicates by id, so a re-executed job yields the same set.
    pub fn document_saved(&self, job: &QueueJob, document_id: impl Into<String>) {
        self.events.publish(Event::DocumentSaved {
            job_id: job.id,
            parent_id: job.parent_id,
            document_id: document_id.into(),
        });
    }
}

/// One worker per job type (the `QueueJob.type` tag).
///
/// `execute` must be idempotent at the job-id level: the queue is
/// at-least-once, so the same job may run twice.
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    fn job_type(&self) -> &'static str;

    /// Synchronous check before `execute`; a failure is permanent (the job
    /// fails without retry).
    fn validate(&self, _job: &QueueJob) -> Result<(), CoreError> {
        Ok(())
    }

    async fn execute(&self, ctx: &WorkerContext, job: &QueueJob) -> Result<(), CoreError>;
}

#[derive(Default)]
pub struct WorkerRegistry {
    by_type: HashMap<&'static str, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        tracing::info!(job_type = worker.job_type(), "worker registered");
        self.by_type.insert(worker.job_type(), worker);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Worker>> {
        self.by_type.get(job_type).cloned()
    }

    /// The queue names the dispatcher polls: one per registered type.
    pub fn job_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.by_type.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
