// SPDX-License-Identifier: MIT

//! Worker-pool dispatcher: polls the queue, routes messages by job type to
//! registered workers, and owns every child-state mutation (workers never
//! touch job state themselves).

use crate::bus::EventBus;
use crate::job_logger::JobLogger;
use crate::worker::{WorkerContext, WorkerRegistry};
use parking_lot::Mutex;
use quaero_core::{Clock, CoreError, ErrorKind, JobId, JobStatus, QueueMessage};
use quaero_storage::{JobStore, Queue, StorageError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Backoff floor when a poll comes back empty.
    pub poll_interval: Duration,
    /// Backoff ceiling.
    pub max_poll_interval: Duration,
    pub batch_size: usize,
    pub default_pool_size: usize,
    /// Per-job-type pool overrides.
    pub pool_sizes: HashMap<String, usize>,
    /// Default per-job execute deadline.
    pub execute_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            max_poll_interval: Duration::from_millis(500),
            batch_size: 8,
            default_pool_size: 4,
            pool_sizes: HashMap::new(),
            execute_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Cancellation tokens of jobs currently executing, shared with the parent
/// monitor so a timed-out parent can cancel its in-flight children.
#[derive(Default)]
pub struct Inflight {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl Inflight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: JobId, token: CancellationToken) {
        self.tokens.lock().insert(job_id, token);
    }

    pub fn remove(&self, job_id: &JobId) {
        self.tokens.lock().remove(job_id);
    }

    /// Cancel one executing job. Returns false when it is not in flight.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.tokens.lock().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

pub struct Dispatcher<C: Clock> {
    jobs: Arc<JobStore<C>>,
    queue: Arc<Queue<C>>,
    workers: Arc<WorkerRegistry>,
    bus: EventBus,
    logger: JobLogger,
    inflight: Arc<Inflight>,
    config: DispatcherConfig,
    cancel: CancellationToken,
}

impl<C: Clock> Dispatcher<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<JobStore<C>>,
        queue: Arc<Queue<C>>,
        workers: Arc<WorkerRegistry>,
        bus: EventBus,
        logger: JobLogger,
        inflight: Arc<Inflight>,
        config: DispatcherConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self { jobs, queue, workers, bus, logger, inflight, config, cancel })
    }

    /// Start one poll loop per registered worker type.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.workers
            .job_types()
            .into_iter()
            .map(|job_type| {
                let pool = self
                    .config
                    .pool_sizes
                    .get(job_type)
                    .copied()
                    .unwrap_or(self.config.default_pool_size)
                    .max(1);
                let semaphore = Arc::new(Semaphore::new(pool));
                let dispatcher = Arc::clone(self);
                tokio::spawn(async move {
                    dispatcher.run_queue(job_type, semaphore).await;
                })
            })
            .collect()
    }

    async fn run_queue(self: Arc<Self>, job_type: &'static str, semaphore: Arc<Semaphore>) {
        tracing::debug!(job_type, "dispatcher loop started");
        let mut backoff = self.config.poll_interval;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let free = semaphore.available_permits().min(self.config.batch_size);
            let batch = if free == 0 {
                Vec::new()
            } else {
                match self.queue.receive(job_type, free) {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::error!(job_type, error = %e, "queue receive failed");
                        Vec::new()
                    }
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(self.config.max_poll_interval);
                continue;
            }
            backoff = self.config.poll_interval;

            for msg in batch {
                // Acquire never fails: the semaphore is never closed.
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    return;
                };
                let dispatcher = Arc::clone(&self);
                tokio::spawn(async move {
                    dispatcher.process(msg).await;
                    drop(permit);
                });
            }
        }
        tracing::debug!(job_type, "dispatcher loop stopped");
    }

    async fn process(&self, msg: QueueMessage) {
        let job = msg.job.clone();
        let job_id = job.id;

        // The record may be gone (deleted) or already terminal (cancelled
        // while queued); both drop the message.
        let state = match self.jobs.state_of(&job_id) {
            Ok(state) => state,
            Err(StorageError::NotFound(_)) => {
                self.ack(&msg, "record gone");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "state load failed, requeueing");
                if let Err(e) = self.queue.nack(&msg.message_id, Some(self.config.poll_interval)) {
                    tracing::error!(job_id = %job_id, error = %e, "nack failed after state load error");
                }
                return;
            }
        };
        if state.is_terminal() {
            self.ack(&msg, "already terminal");
            return;
        }
        if state.cancel_requested() {
            if let Err(e) = self.jobs.set_finished(
                &job_id,
                JobStatus::Cancelled,
                Some(CoreError::new(ErrorKind::Cancelled, "cancelled before execution").with_job(job_id)),
            ) {
                tracing::error!(job_id = %job_id, error = %e, "could not persist pre-execution cancel");
            }
            self.ack(&msg, "cancel requested");
            return;
        }

        // Message type with no registered worker: dead-letter, fail the job.
        let Some(worker) = self.workers.get(&job.job_type) else {
            let err = CoreError::new(
                ErrorKind::NoHandler,
                format!("no worker registered for job type {:?}", job.job_type),
            )
            .with_job(job_id);
            tracing::error!(job_id = %job_id, job_type = %job.job_type, "dead-lettering: no handler");
            if let Err(e) = self.queue.dead_letter(&msg.message_id, err.clone()) {
                tracing::error!(job_id = %job_id, error = %e, "dead-letter failed for unhandled type");
            }
            if let Err(e) = self.jobs.set_finished(&job_id, JobStatus::Failed, Some(err)) {
                tracing::error!(job_id = %job_id, error = %e, "could not fail unhandled job");
            }
            return;
        };

        if let Err(e) = self.jobs.update_status(&job_id, JobStatus::Running, None) {
            tracing::warn!(job_id = %job_id, error = %e, "could not mark running");
        }
        self.logger.debug(job_id, format!("message received (delivery {})", msg.receive_count));

        if let Err(e) = worker.validate(&job) {
            let err = e.with_job(job_id);
            self.logger.error(job_id, format!("validation failed: {err}"));
            if let Err(e) = self.jobs.set_finished(&job_id, JobStatus::Failed, Some(err)) {
                tracing::error!(job_id = %job_id, error = %e, "could not fail invalid job");
            }
            self.ack(&msg, "validation failed");
            return;
        }

        let token = self.cancel.child_token();
        self.inflight.register(job_id, token.clone());

        // Heartbeat: keep the message invisible while the worker runs.
        let visibility = self.queue.config().visibility_timeout;
        let heartbeat = {
            let queue = Arc::clone(&self.queue);
            let message_id = msg.message_id;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(visibility / 2);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    if queue.extend(&message_id, visibility).is_err() {
                        break;
                    }
                }
            })
        };

        let ctx = WorkerContext {
            cancel: token.clone(),
            logger: self.logger.clone(),
            events: Arc::new(self.bus.clone()),
        };
        let result = tokio::select! {
            _ = token.cancelled() => {
                Err(CoreError::new(ErrorKind::Cancelled, "execution cancelled").with_job(job_id))
            }
            outcome = tokio::time::timeout(self.config.execute_timeout, worker.execute(&ctx, &job)) => {
                match outcome {
                    Ok(result) => result.map_err(|e| e.with_job(job_id)),
                    Err(_) => Err(CoreError::new(
                        ErrorKind::Timeout,
                        format!("execute exceeded {:?}", self.config.execute_timeout),
                    )
                    .with_job(job_id)),
                }
            }
        };

        heartbeat.abort();
        self.inflight.remove(&job_id);

        // Persisting the outcome can itself fail once the storage layer's
        // bounded retries are exhausted; that final failure is logged here
        // and the monitor's periodic recompute reconciles the stale state.
        match result {
            Ok(()) => {
                if let Err(e) = self.jobs.set_finished(&job_id, JobStatus::Completed, None) {
                    tracing::error!(job_id = %job_id, error = %e, "could not persist completion");
                }
                self.ack(&msg, "completed");
                self.logger.debug(job_id, "completed");
            }
            Err(err) if err.kind == ErrorKind::Cancelled => {
                if let Err(e) = self.jobs.set_finished(&job_id, JobStatus::Cancelled, Some(err)) {
                    tracing::error!(job_id = %job_id, error = %e, "could not persist cancellation");
                }
                self.ack(&msg, "cancelled");
            }
            Err(err) => {
                if msg.receive_count >= self.queue.config().max_receive {
                    let exhausted = CoreError::new(
                        ErrorKind::MaxRetriesExceeded,
                        format!("{} deliveries, last error: {err}", msg.receive_count),
                    )
                    .with_job(job_id);
                    self.logger.error(job_id, exhausted.message.clone());
                    if let Err(e) = self.queue.dead_letter(&msg.message_id, exhausted.clone()) {
                        tracing::error!(job_id = %job_id, error = %e, "dead-letter failed");
                    }
                    if let Err(e) =
                        self.jobs.set_finished(&job_id, JobStatus::Failed, Some(exhausted))
                    {
                        tracing::error!(job_id = %job_id, error = %e, "could not persist exhaustion failure");
                    }
                } else {
                    self.logger.warn(job_id, format!("attempt {} failed: {err}", msg.receive_count));
                    // Redelivery edge: running → queued.
                    if let Err(e) = self.jobs.update_status(&job_id, JobStatus::Queued, Some(err)) {
                        tracing::error!(job_id = %job_id, error = %e, "could not requeue job status");
                    }
                    if let Err(e) =
                        self.queue.nack(&msg.message_id, Some(self.config.poll_interval))
                    {
                        tracing::error!(job_id = %job_id, error = %e, "nack failed after worker error");
                    }
                }
            }
        }
    }

    /// Acknowledge a message, logging instead of failing the caller when the
    /// delete itself errors (a re-delivered duplicate is already gone).
    fn ack(&self, msg: &QueueMessage, context: &str) {
        if let Err(e) = self.queue.ack(&msg.message_id) {
            tracing::warn!(
                job_id = %msg.job.id,
                message_id = %msg.message_id,
                error = %e,
                "ack failed ({context})"
            );
        }
    }

    #[cfg(test)]
    pub(crate) async fn process_for_test(&self, msg: QueueMessage) {
        self.process(msg).await;
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
