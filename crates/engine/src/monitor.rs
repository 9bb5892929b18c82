// SPDX-License-Identifier: MIT

//! Parent-job monitor: aggregates child outcomes into the parent's progress
//! and terminal state.
//!
//! One monitor task per parent. It validates the canonical parent type,
//! watches `child:status_change` / `document:saved` events scoped to its
//! parent, recomputes child stats on every event and on a periodic tick,
//! and finalizes the parent when all children are terminal, the definition
//! timeout fires, or the parent is cancelled.

use crate::bus::EventBus;
use crate::dispatch::Inflight;
use crate::job_logger::JobLogger;
use quaero_core::job::meta;
use quaero_core::{
    ChildStats, Clock, CoreError, ErrorKind, Event, EventKind, JobId, JobStatus, QueueJobState,
    PARENT_TYPE,
};
use quaero_definition::ErrorTolerance;
use quaero_storage::{JobStore, Queue};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub progress_interval: Duration,
    /// End-to-end deadline from the definition; `None` disables.
    pub timeout: Option<Duration>,
    pub tolerance: ErrorTolerance,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(5),
            timeout: None,
            tolerance: ErrorTolerance::Strict,
        }
    }
}

impl MonitorConfig {
    /// Recover monitor settings from the parent's metadata (written by the
    /// manager at spawn time); used when adopting parents after a restart.
    pub fn from_state(state: &QueueJobState, progress_interval: Duration) -> Self {
        let timeout = state
            .metadata
            .get(meta::TIMEOUT_MS)
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis);
        let tolerance = state
            .metadata
            .get(meta::ERROR_TOLERANCE)
            .and_then(|v| v.as_str())
            .and_then(|s| ErrorTolerance::parse(s).ok())
            .unwrap_or_default();
        Self { progress_interval, timeout, tolerance }
    }
}

pub struct ParentMonitor<C: Clock> {
    parent_id: JobId,
    jobs: Arc<JobStore<C>>,
    queue: Arc<Queue<C>>,
    bus: EventBus,
    logger: JobLogger,
    clock: C,
    inflight: Arc<Inflight>,
    config: MonitorConfig,
    cancel: CancellationToken,
}

impl<C: Clock> ParentMonitor<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent_id: JobId,
        jobs: Arc<JobStore<C>>,
        queue: Arc<Queue<C>>,
        bus: EventBus,
        logger: JobLogger,
        clock: C,
        inflight: Arc<Inflight>,
        config: MonitorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { parent_id, jobs, queue, bus, logger, clock, inflight, config, cancel }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let id = self.parent_id;
        let parent = match self.jobs.get(&id) {
            Ok(parent) => parent,
            Err(e) => {
                tracing::error!(parent_id = %id, error = %e, "monitor could not load parent");
                return;
            }
        };

        // Load-bearing invariant: only the canonical parent tag is accepted.
        // A divergent tag fails the parent here while its children, already
        // enqueued, run to completion on their own.
        if parent.job_type != PARENT_TYPE {
            let err = CoreError::new(
                ErrorKind::InvalidJobType,
                format!("expected job type {PARENT_TYPE:?}, got {:?}", parent.job_type),
            )
            .with_job(id);
            self.logger.error(id, err.message.clone());
            if let Err(e) = self.jobs.set_finished(&id, JobStatus::Failed, Some(err)) {
                tracing::error!(parent_id = %id, error = %e, "could not fail mistyped parent");
            }
            return;
        }

        if let Err(e) = self.jobs.update_status(&id, JobStatus::Running, None) {
            tracing::warn!(parent_id = %id, error = %e, "could not mark parent running");
        }

        let (child_sub, mut child_rx) = self.bus.subscribe_channel(EventKind::ChildStatusChange);
        let (doc_sub, mut doc_rx) = self.bus.subscribe_channel(EventKind::DocumentSaved);

        let mut ticker = tokio::time::interval(self.config.progress_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let woke = tokio::select! {
                // Process shutdown: exit without touching parent state; a
                // fresh monitor adopts the parent on restart.
                _ = self.cancel.cancelled() => break,
                event = child_rx.recv() => {
                    match event {
                        Some(event) => event.parent_id() == Some(id),
                        None => break,
                    }
                }
                event = doc_rx.recv() => {
                    match event {
                        Some(event) => self.apply_document(&event),
                        None => break,
                    }
                }
                _ = ticker.tick() => true,
            };
            if !woke {
                continue;
            }
            // Absorb document events already queued before aggregating:
            // workers publish documents before their terminal status lands,
            // so the count must not trail the final recompute.
            while let Ok(event) = doc_rx.try_recv() {
                self.apply_document(&event);
            }
            if self.recompute() {
                break;
            }
        }

        self.bus.unsubscribe(child_sub);
        self.bus.unsubscribe(doc_sub);
        tracing::debug!(parent_id = %id, "monitor exited");
    }

    /// Count one `document:saved` event scoped to this parent. Returns true
    /// when the event belonged here.
    fn apply_document(&self, event: &Event) -> bool {
        match event {
            Event::DocumentSaved { parent_id: Some(parent_id), .. }
                if *parent_id == self.parent_id =>
            {
                if let Err(e) = self.jobs.increment_document_count(&self.parent_id, 1) {
                    tracing::warn!(parent_id = %self.parent_id, error = %e, "document count update failed");
                }
                true
            }
            _ => false,
        }
    }

    /// One aggregation pass. Returns true when the parent reached a
    /// terminal state and the monitor should exit.
    fn recompute(&self) -> bool {
        let id = self.parent_id;
        let parent_state = match self.jobs.state_of(&id) {
            Ok(state) => state,
            Err(e) => {
                // Parent deleted out from under us: nothing left to monitor.
                tracing::warn!(parent_id = %id, error = %e, "parent state unavailable");
                return true;
            }
        };
        if parent_state.is_terminal() {
            self.cancel_children();
            return true;
        }

        let mut children = match self.jobs.child_states(&id) {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(parent_id = %id, error = %e, "child listing failed, retrying next tick");
                return false;
            }
        };

        // Reconcile crash-redelivered children whose message hit the
        // dead-letter limit without passing through the dispatcher.
        for child in &mut children {
            if child.is_terminal() {
                continue;
            }
            let dead = self
                .queue
                .is_dead_lettered(&child.queue_job.job_type, &child.queue_job.id)
                .unwrap_or(false);
            if dead {
                let err = CoreError::new(ErrorKind::MaxRetriesExceeded, "message dead-lettered")
                    .with_job(child.queue_job.id);
                match self.jobs.set_finished(&child.queue_job.id, JobStatus::Failed, Some(err)) {
                    Ok(updated) => *child = updated,
                    Err(e) => {
                        tracing::warn!(child = %child.queue_job.id, error = %e, "dead-letter reconcile failed")
                    }
                }
            }
        }

        let mut stats = ChildStats::from_states(children.iter());
        stats.document_count = parent_state.document_count();

        let progress = stats.to_progress();
        let mut patch = Map::new();
        patch.insert(meta::PROGRESS.into(), json!(progress));
        patch.insert(meta::HEARTBEAT_MS.into(), json!(self.clock.epoch_ms()));
        if let Err(e) = self.jobs.patch_metadata(&id, &patch) {
            tracing::warn!(parent_id = %id, error = %e, "progress patch failed");
        }
        self.bus.publish(Event::JobProgress { job_id: id, progress, stats: stats.clone() });
        self.logger.debug(
            id,
            format!("progress {}/{} ({} failed)", stats.completed, stats.total, stats.failed),
        );

        if self.timed_out(&parent_state) {
            self.fail_timeout(&children);
            return true;
        }

        if stats.all_terminal() {
            let (status, error) = if parent_state.cancel_requested() {
                (
                    JobStatus::Cancelled,
                    Some(CoreError::new(ErrorKind::Cancelled, "parent cancelled").with_job(id)),
                )
            } else if self.config.tolerance.breached(stats.failed, stats.total) {
                (
                    JobStatus::Failed,
                    Some(
                        CoreError::new(
                            ErrorKind::StepFailed,
                            format!("{} of {} children failed", stats.failed, stats.total),
                        )
                        .with_job(id),
                    ),
                )
            } else {
                (JobStatus::Completed, None)
            };
            if let Err(e) = self.jobs.set_finished(&id, status, error) {
                tracing::error!(parent_id = %id, error = %e, "parent finalization failed");
                return false;
            }
            self.logger.info(id, format!("parent {status} with {} children", stats.total));
            return true;
        }
        false
    }

    fn timed_out(&self, parent_state: &QueueJobState) -> bool {
        let Some(timeout) = self.config.timeout else {
            return false;
        };
        let Some(started) = parent_state.started_at_ms else {
            return false;
        };
        self.clock.epoch_ms().saturating_sub(started) > timeout.as_millis() as u64
    }

    fn fail_timeout(&self, children: &[QueueJobState]) {
        let id = self.parent_id;
        let err = CoreError::new(ErrorKind::Timeout, "definition timeout exceeded").with_job(id);
        self.logger.error(id, err.message.clone());
        if let Err(e) = self.jobs.set_finished(&id, JobStatus::Failed, Some(err)) {
            tracing::error!(parent_id = %id, error = %e, "could not fail timed-out parent");
        }
        self.cancel_child_states(children);
    }

    fn cancel_children(&self) {
        match self.jobs.child_states(&self.parent_id) {
            Ok(children) => self.cancel_child_states(&children),
            Err(e) => {
                tracing::warn!(parent_id = %self.parent_id, error = %e, "child cancel sweep failed")
            }
        }
    }

    /// Cancel every non-terminal child: flag it for the dispatcher's
    /// pre-execution check, cancel it in flight, and finalize the ones not
    /// yet picked up. In-flight children observe their token and finish on
    /// their own.
    fn cancel_child_states(&self, children: &[QueueJobState]) {
        for child in children {
            if child.is_terminal() {
                continue;
            }
            let child_id = child.queue_job.id;
            let mut patch = Map::new();
            patch.insert(meta::CANCEL_REQUESTED.into(), json!(true));
            if let Err(e) = self.jobs.patch_metadata(&child_id, &patch) {
                tracing::warn!(child = %child_id, error = %e, "cancel flag patch failed");
            }
            let in_flight = self.inflight.cancel(&child_id);
            if !in_flight && matches!(child.status, JobStatus::Pending | JobStatus::Queued) {
                let err =
                    CoreError::new(ErrorKind::Cancelled, "parent cancelled").with_job(child_id);
                if let Err(e) = self.jobs.set_finished(&child_id, JobStatus::Cancelled, Some(err)) {
                    tracing::warn!(child = %child_id, error = %e, "child cancel failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
