// SPDX-License-Identifier: MIT

//! Job-definition orchestrator: routes each step of a definition to the
//! manager for its action type, chains dependent steps, applies the
//! error-tolerance policy, and runs the cron schedule loop.

use crate::bus::EventBus;
use crate::dispatch::Inflight;
use crate::error::EngineError;
use crate::job_logger::JobLogger;
use crate::manager::{ManagerContext, ManagerRegistry};
use crate::monitor::{MonitorConfig, ParentMonitor};
use quaero_core::{ChildStats, Clock, JobId, JobStatus, QueueJobState};
use quaero_definition::{ErrorTolerance, JobDefinition};
use quaero_storage::{DefinitionStore, JobStore, Queue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Orchestrator<C: Clock> {
    defs: Arc<DefinitionStore>,
    managers: Arc<ManagerRegistry<C>>,
    jobs: Arc<JobStore<C>>,
    queue: Arc<Queue<C>>,
    bus: EventBus,
    logger: JobLogger,
    clock: C,
    inflight: Arc<Inflight>,
    progress_interval: Duration,
    cancel: CancellationToken,
}

impl<C: Clock> Orchestrator<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        defs: Arc<DefinitionStore>,
        managers: Arc<ManagerRegistry<C>>,
        jobs: Arc<JobStore<C>>,
        queue: Arc<Queue<C>>,
        bus: EventBus,
        logger: JobLogger,
        clock: C,
        inflight: Arc<Inflight>,
        progress_interval: Duration,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            defs,
            managers,
            jobs,
            queue,
            bus,
            logger,
            clock,
            inflight,
            progress_interval,
            cancel,
        })
    }

    /// Execute a definition: steps in declaration order, one parent job per
    /// step. Returns once every parent has been enqueued; completion is the
    /// monitors' business. Only a `depends_on` edge waits, and it waits on
    /// the dependency's terminal state so the tolerance policy has a full
    /// denominator.
    pub async fn run_definition(&self, id: &str) -> Result<Vec<JobId>, EngineError> {
        let def = self.defs.get(id).ok_or_else(|| EngineError::DefinitionNotFound(id.into()))?;
        tracing::info!(definition = %def.id, steps = def.steps.len(), "definition run started");

        let mut parents = Vec::new();
        let mut parent_by_step: HashMap<&str, JobId> = HashMap::new();

        for step in &def.steps {
            if let Some(dep) = &step.depends_on {
                // Validation guarantees the dependency is an earlier step,
                // but it may have been skipped under continue_on_error.
                if let Some(dep_parent) = parent_by_step.get(dep.as_str()).copied() {
                    let (state, stats) = self.wait_terminal(dep_parent).await?;
                    if self.dependency_blocks(&def, &state, &stats) {
                        return Err(EngineError::StepFailed {
                            step: dep.clone(),
                            message: format!(
                                "{} of {} children failed ({} tolerance)",
                                stats.failed, stats.total, def.error_tolerance
                            ),
                        });
                    }
                }
            }

            let manager = self
                .managers
                .get(&step.action)
                .ok_or_else(|| EngineError::NoManager(step.action.clone()))?;

            let ctx = ManagerContext {
                jobs: self.jobs.clone(),
                queue: self.queue.clone(),
                logger: self.logger.clone(),
                clock: self.clock.clone(),
            };
            match manager.create_parent_job(step, &def, &ctx).await {
                Ok(parent_id) => {
                    let _monitor = self.spawn_monitor(parent_id, &def);
                    parent_by_step.insert(step.name.as_str(), parent_id);
                    parents.push(parent_id);
                }
                Err(e) if def.error_tolerance == ErrorTolerance::ContinueOnError => {
                    tracing::warn!(definition = %def.id, step = %step.name, error = %e, "step skipped");
                }
                Err(e) => {
                    return Err(EngineError::StepFailed {
                        step: step.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(parents)
    }

    fn dependency_blocks(
        &self,
        def: &JobDefinition,
        state: &QueueJobState,
        stats: &ChildStats,
    ) -> bool {
        match def.error_tolerance {
            ErrorTolerance::ContinueOnError => false,
            tolerance => {
                state.status != JobStatus::Completed || tolerance.breached(stats.failed, stats.total)
            }
        }
    }

    async fn wait_terminal(
        &self,
        parent_id: JobId,
    ) -> Result<(QueueJobState, ChildStats), EngineError> {
        loop {
            let state = self.jobs.state_of(&parent_id)?;
            if state.is_terminal() {
                let stats = ChildStats::from_states(self.jobs.child_states(&parent_id)?.iter());
                return Ok((state, stats));
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    /// Start a monitor for a freshly created (or adopted) parent.
    pub fn spawn_monitor(&self, parent_id: JobId, def: &JobDefinition) -> JoinHandle<()> {
        let config = MonitorConfig {
            progress_interval: self.progress_interval,
            timeout: Some(def.timeout()),
            tolerance: def.error_tolerance,
        };
        self.monitor_with(parent_id, config)
    }

    pub fn adopt_monitor(&self, state: &QueueJobState) -> JoinHandle<()> {
        let config = MonitorConfig::from_state(state, self.progress_interval);
        self.monitor_with(state.queue_job.id, config)
    }

    fn monitor_with(&self, parent_id: JobId, config: MonitorConfig) -> JoinHandle<()> {
        ParentMonitor::new(
            parent_id,
            self.jobs.clone(),
            self.queue.clone(),
            self.bus.clone(),
            self.logger.clone(),
            self.clock.clone(),
            self.inflight.clone(),
            config,
            self.cancel.child_token(),
        )
        .spawn()
    }

    /// Run every enabled `auto_start` definition once. Called at startup.
    pub async fn auto_start(&self) {
        let defs: Vec<JobDefinition> =
            self.defs.list().into_iter().filter(|d| d.enabled && d.auto_start).collect();
        for def in defs {
            tracing::info!(definition = %def.id, "auto-starting definition");
            if let Err(e) = self.run_definition(&def.id).await {
                tracing::error!(definition = %def.id, error = %e, "auto-start run failed");
            }
        }
    }

    /// Cron loop: fire enabled scheduled definitions at most once per
    /// matching minute.
    pub fn spawn_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut fired: HashMap<String, String> = HashMap::new();
            loop {
                tokio::select! {
                    _ = orchestrator.cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(20)) => {}
                }
                let now = chrono::Utc::now();
                let minute = now.format("%Y-%m-%dT%H:%M").to_string();
                for def in orchestrator.defs.list() {
                    if !def.enabled {
                        continue;
                    }
                    let Some(cron) = def.cron() else { continue };
                    if !cron.matches(now) || fired.get(&def.id) == Some(&minute) {
                        continue;
                    }
                    fired.insert(def.id.clone(), minute.clone());
                    tracing::info!(definition = %def.id, "schedule fired");
                    if let Err(e) = orchestrator.run_definition(&def.id).await {
                        tracing::error!(definition = %def.id, error = %e, "scheduled run failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
