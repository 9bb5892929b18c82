// SPDX-License-Identifier: MIT

//! Engine wiring and the control surface the HTTP/WS layer consumes.
//!
//! Construction is an explicit list ordered by the component dependency
//! graph: bus → job store → queue → log consumer → definitions →
//! registries → dispatcher → orchestrator.

use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::dispatch::{Dispatcher, Inflight};
use crate::error::EngineError;
use crate::job_logger::{JobLogger, LogConsumer};
use crate::manager::ManagerRegistry;
use crate::managers::builtin_registry;
use crate::orchestrator::Orchestrator;
use crate::reconcile;
use crate::worker::{Worker, WorkerRegistry};
use crate::workers::crawler::{CrawlerUrlWorker, Fetcher};
use crate::workers::maintenance::MaintenanceWorker;
use parking_lot::Mutex;
use quaero_core::job::meta;
use quaero_core::{Clock, JobId, QueueJobState, SystemClock};
use quaero_storage::{
    AggregatedLogs, DefinitionStore, JobStore, KeyValue, LogQuery, MemoryStore, Queue, QueueStats,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// External collaborators injected at construction.
#[derive(Default)]
pub struct EngineDeps {
    /// HTTP/rendering layer for the crawler worker; without one, crawl
    /// children dead-letter as unhandled.
    pub fetcher: Option<Arc<dyn Fetcher>>,
    /// Additional workers (LLM providers, search APIs, …).
    pub extra_workers: Vec<Arc<dyn Worker>>,
}

pub struct Engine<C: Clock> {
    config: EngineConfig,
    bus: EventBus,
    jobs: Arc<JobStore<C>>,
    queue: Arc<Queue<C>>,
    defs: Arc<DefinitionStore>,
    logger: JobLogger,
    consumer: Mutex<Option<LogConsumer<C>>>,
    workers: Arc<WorkerRegistry>,
    inflight: Arc<Inflight>,
    orchestrator: Arc<Orchestrator<C>>,
    clock: C,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine<SystemClock> {
    /// Engine over the in-memory store; the embedded on-disk engine plugs
    /// in through [`Engine::with_store`].
    pub fn in_memory(config: EngineConfig, deps: EngineDeps) -> Result<Self, EngineError> {
        Self::with_store(config, Arc::new(MemoryStore::new()), SystemClock, deps)
    }
}

impl<C: Clock> Engine<C> {
    pub fn with_store(
        config: EngineConfig,
        kv: Arc<dyn KeyValue>,
        clock: C,
        deps: EngineDeps,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let cancel = CancellationToken::new();

        let bus = EventBus::new();
        let jobs = Arc::new(JobStore::new(kv.clone(), Arc::new(bus.clone()), clock.clone()));
        let queue = Arc::new(Queue::new(
            kv.clone(),
            Arc::new(bus.clone()),
            clock.clone(),
            config.queue_config()?,
        ));
        let (logger, consumer) = LogConsumer::channel(jobs.clone(), bus.clone());
        let defs = Arc::new(DefinitionStore::new(kv.clone(), config.definition_dir.clone()));

        let managers: Arc<ManagerRegistry<C>> = Arc::new(builtin_registry());

        let mut workers = WorkerRegistry::new();
        workers.register(Arc::new(MaintenanceWorker::new(kv)));
        if let Some(fetcher) = deps.fetcher {
            workers.register(Arc::new(CrawlerUrlWorker::new(
                fetcher,
                jobs.clone(),
                queue.clone(),
                clock.clone(),
            )));
        }
        for worker in deps.extra_workers {
            workers.register(worker);
        }
        let workers = Arc::new(workers);

        let inflight = Arc::new(Inflight::new());
        let orchestrator = Orchestrator::new(
            defs.clone(),
            managers,
            jobs.clone(),
            queue.clone(),
            bus.clone(),
            logger.clone(),
            clock.clone(),
            inflight.clone(),
            config.progress_interval()?,
            cancel.clone(),
        );

        Ok(Self {
            config,
            bus,
            jobs,
            queue,
            defs,
            logger,
            consumer: Mutex::new(Some(consumer)),
            workers,
            inflight,
            orchestrator,
            clock,
            cancel,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Bring the engine up: load definitions, start the log consumer, the
    /// dispatcher loops, and the scheduler; adopt orphaned parents; run
    /// auto-start definitions.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.defs.load()?;

        let mut tasks = Vec::new();
        if let Some(consumer) = self.consumer.lock().take() {
            tasks.push(consumer.spawn(self.cancel.clone()));
        }

        let dispatcher = Dispatcher::new(
            self.jobs.clone(),
            self.queue.clone(),
            self.workers.clone(),
            self.bus.clone(),
            self.logger.clone(),
            self.inflight.clone(),
            self.config.dispatcher_config()?,
            self.cancel.clone(),
        );
        tasks.extend(dispatcher.spawn());

        let adopted = reconcile::adopt_parents(
            &self.orchestrator,
            &self.jobs,
            self.clock.epoch_ms(),
            self.config.stale_after()?,
        );
        if adopted > 0 {
            tracing::info!(adopted, "orphaned parents adopted");
        }

        tasks.push(self.orchestrator.spawn_scheduler());
        self.tasks.lock().extend(tasks);

        self.orchestrator.auto_start().await;
        tracing::info!(workers = self.workers.job_types().len(), "engine ready");
        Ok(())
    }

    /// Cancel the task tree and join every long-lived task.
    pub async fn shutdown(&self) {
        tracing::info!("engine shutting down");
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                tracing::warn!("task did not stop within the shutdown grace period");
            }
        }
    }

    // ── Control surface ────────────────────────────────────────────────

    pub async fn run_definition(&self, id: &str) -> Result<Vec<JobId>, EngineError> {
        self.orchestrator.run_definition(id).await
    }

    pub fn reload_definitions(&self) -> Result<usize, EngineError> {
        Ok(self.defs.reload()?)
    }

    pub fn get_job(&self, id: &JobId) -> Result<QueueJobState, EngineError> {
        Ok(self.jobs.state_of(id)?)
    }

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<QueueJobState>, EngineError> {
        Ok(self.jobs.list_states(limit)?)
    }

    pub fn list_children(&self, parent_id: &JobId) -> Result<Vec<QueueJobState>, EngineError> {
        Ok(self.jobs.child_states(parent_id)?)
    }

    pub fn aggregated_logs(
        &self,
        job_id: &JobId,
        include_children: bool,
        query: &LogQuery,
    ) -> Result<AggregatedLogs, EngineError> {
        Ok(self.jobs.aggregated_logs(job_id, include_children, query)?)
    }

    pub fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, EngineError> {
        Ok(self.queue.stats(queue_name)?)
    }

    /// Delete a job. A running job (and a running parent's children) is
    /// cancelled first; logs and children are removed with it.
    pub async fn delete_job(&self, id: &JobId) -> Result<(), EngineError> {
        let state = self.jobs.state_of(id)?;
        let children =
            if state.queue_job.is_parent() { self.jobs.child_states(id)? } else { Vec::new() };

        if !state.is_terminal() {
            let mut patch = serde_json::Map::new();
            patch.insert(meta::CANCEL_REQUESTED.into(), json!(true));
            self.jobs.patch_metadata(id, &patch)?;
            self.inflight.cancel(id);
        }
        for child in &children {
            if child.is_terminal() {
                continue;
            }
            let child_id = child.queue_job.id;
            let mut patch = serde_json::Map::new();
            patch.insert(meta::CANCEL_REQUESTED.into(), json!(true));
            self.jobs.patch_metadata(&child_id, &patch)?;
            self.inflight.cancel(&child_id);
        }

        for child in &children {
            self.jobs.delete(&child.queue_job.id)?;
        }
        self.jobs.delete(id)?;
        self.logger.info(*id, "job deleted");
        Ok(())
    }

    /// Start a monitor for an externally created parent (tests and the
    /// control surface's re-run paths).
    pub fn monitor_parent(&self, parent_id: JobId) -> Result<(), EngineError> {
        let state = self.jobs.state_of(&parent_id)?;
        let _monitor = self.orchestrator.adopt_monitor(&state);
        Ok(())
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn jobs(&self) -> &Arc<JobStore<C>> {
        &self.jobs
    }

    pub fn queue(&self) -> &Arc<Queue<C>> {
        &self.queue
    }

    pub fn definitions(&self) -> &Arc<DefinitionStore> {
        &self.defs
    }

    pub fn job_logger(&self) -> &JobLogger {
        &self.logger
    }
}

impl<C: Clock> Drop for Engine<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
