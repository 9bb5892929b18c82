// SPDX-License-Identifier: MIT

//! Per-job structured logging: the [`JobLogger`] handle components log
//! through, and the [`LogConsumer`] task that persists entries and
//! republishes them as `log:event`s.
//!
//! The consumer is the only bridge from the logger to the event bus and
//! carries the recursion guard: an entry whose `(job_id, message)` is still
//! in the recently-published window is persisted but not republished, so a
//! subscriber that logs in reaction to `log:event` cannot amplify itself.

use crate::bus::EventBus;
use quaero_core::{Clock, Event, JobId, JobLogEntry, LogLevel};
use quaero_storage::JobStore;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Entries remembered by the republish guard.
const GUARD_WINDOW: usize = 128;

/// Cheap cloneable handle for writing per-job log entries.
#[derive(Clone)]
pub struct JobLogger {
    tx: mpsc::UnboundedSender<JobLogEntry>,
}

impl JobLogger {
    pub fn log(&self, entry: JobLogEntry) {
        // A closed consumer means shutdown; entries are best-effort then.
        let _ = self.tx.send(entry);
    }

    pub fn entry(&self, job_id: JobId, level: LogLevel, message: impl Into<String>) {
        self.log(JobLogEntry::new(job_id, 0, level, message));
    }

    pub fn debug(&self, job_id: JobId, message: impl Into<String>) {
        self.entry(job_id, LogLevel::Debug, message);
    }

    pub fn info(&self, job_id: JobId, message: impl Into<String>) {
        self.entry(job_id, LogLevel::Info, message);
    }

    pub fn warn(&self, job_id: JobId, message: impl Into<String>) {
        self.entry(job_id, LogLevel::Warn, message);
    }

    pub fn error(&self, job_id: JobId, message: impl Into<String>) {
        self.entry(job_id, LogLevel::Error, message);
    }

    pub fn with_fields(
        &self,
        job_id: JobId,
        level: LogLevel,
        message: impl Into<String>,
        fields: Vec<(&str, Value)>,
    ) {
        let mut entry = JobLogEntry::new(job_id, 0, level, message);
        for (k, v) in fields {
            entry = entry.with_field(k, v);
        }
        self.log(entry);
    }
}

/// Sink task: drains the logger channel, appends entries to storage, and
/// republishes each as a `log:event`.
pub struct LogConsumer<C: Clock> {
    rx: mpsc::UnboundedReceiver<JobLogEntry>,
    jobs: Arc<JobStore<C>>,
    bus: EventBus,
    guard: RepublishGuard,
}

/// Sliding window of recently republished `(job_id, message)` pairs.
struct RepublishGuard {
    seen: HashSet<(JobId, String)>,
    order: VecDeque<(JobId, String)>,
}

impl RepublishGuard {
    fn new() -> Self {
        Self { seen: HashSet::new(), order: VecDeque::new() }
    }

    /// Returns false when the key was already in the window.
    fn admit(&mut self, key: (JobId, String)) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > GUARD_WINDOW {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

impl<C: Clock> LogConsumer<C> {
    /// Build the handle/consumer pair.
    pub fn channel(jobs: Arc<JobStore<C>>, bus: EventBus) -> (JobLogger, LogConsumer<C>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (JobLogger { tx }, LogConsumer { rx, jobs, bus, guard: RepublishGuard::new() })
    }

    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    entry = self.rx.recv() => match entry {
                        Some(entry) => self.consume(entry),
                        None => break,
                    },
                }
            }
        })
    }

    fn consume(&mut self, entry: JobLogEntry) {
        if let Err(e) = self.jobs.append_log(entry.clone()) {
            tracing::warn!(job_id = %entry.job_id, error = %e, "failed to persist job log entry");
        }
        if self.guard.admit((entry.job_id, entry.message.clone())) {
            self.bus.publish(Event::LogEvent { entry });
        }
    }

    #[cfg(test)]
    pub(crate) fn consume_for_test(&mut self, entry: JobLogEntry) {
        self.consume(entry);
    }
}

#[cfg(test)]
#[path = "job_logger_tests.rs"]
mod tests;
