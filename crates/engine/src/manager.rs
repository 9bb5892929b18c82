// SPDX-License-Identifier: MIT

//! Manager contract: translate a definition step into a parent job plus
//! enqueued children, and return immediately.

use crate::error::EngineError;
use crate::job_logger::JobLogger;
use quaero_core::job::meta;
use quaero_core::{Clock, JobId, JobStatus, QueueJob, PARENT_TYPE};
use quaero_definition::{JobDefinition, Step};
use quaero_storage::{EnqueueOptions, JobStore, Queue};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Dependencies a manager needs to create jobs.
pub struct ManagerContext<C: Clock> {
    pub jobs: Arc<JobStore<C>>,
    pub queue: Arc<Queue<C>>,
    pub logger: JobLogger,
    pub clock: C,
}

impl<C: Clock> ManagerContext<C> {
    /// One unit of enqueued work under a parent.
    pub fn child(job_type: &str, name: impl Into<String>, config: Map<String, Value>) -> ChildSpec {
        ChildSpec { job_type: job_type.to_string(), name: name.into(), config, priority: 0 }
    }

    /// Persist the parent record (canonical `parent` type) and its children,
    /// enqueue every child, and return the parent id without waiting for any
    /// completion.
    pub fn spawn_parent(
        &self,
        def: &JobDefinition,
        step: &Step,
        children: Vec<ChildSpec>,
    ) -> Result<JobId, EngineError> {
        let now = self.clock.epoch_ms();
        let parent = QueueJob {
            id: JobId::new(),
            parent_id: None,
            job_type: PARENT_TYPE.to_string(),
            name: format!("{}:{}", def.id, step.name),
            created_at_ms: now,
            config: def.step_config(step),
            tags: def.tags.iter().cloned().collect::<BTreeSet<_>>(),
            priority: 0,
        };
        let parent_id = parent.id;
        self.jobs.create_parent(&parent)?;

        // Monitor configuration rides on the parent so adopted monitors can
        // recover it after a restart.
        let mut patch = Map::new();
        patch.insert(meta::DEFINITION_ID.into(), json!(def.id));
        patch.insert(meta::TIMEOUT_MS.into(), json!(def.timeout().as_millis() as u64));
        patch.insert(meta::ERROR_TOLERANCE.into(), json!(def.error_tolerance.to_string()));
        self.jobs.patch_metadata(&parent_id, &patch)?;

        let total = children.len();
        for spec in children {
            let child = QueueJob {
                id: JobId::new(),
                parent_id: Some(parent_id),
                job_type: spec.job_type,
                name: spec.name,
                created_at_ms: self.clock.epoch_ms(),
                config: spec.config,
                tags: parent.tags.clone(),
                priority: spec.priority,
            };
            self.jobs.save(&child)?;
            self.queue.enqueue(child.clone(), EnqueueOptions::default())?;
            self.jobs.update_status(&child.id, JobStatus::Queued, None)?;
        }

        self.logger.info(parent_id, format!("step {} spawned {} child jobs", step.name, total));
        tracing::debug!(parent_id = %parent_id, step = %step.name, children = total, "step enqueued");
        Ok(parent_id)
    }
}

#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub job_type: String,
    pub name: String,
    pub config: Map<String, Value>,
    pub priority: i32,
}

/// One manager per action type (a step's `type` tag).
#[async_trait::async_trait]
pub trait Manager<C: Clock>: Send + Sync {
    fn action_type(&self) -> &'static str;

    /// Whether this action fans out into child jobs (all current ones do).
    fn returns_child_jobs(&self) -> bool {
        true
    }

    /// Validate the step config, enumerate the work, persist parent and
    /// children. Must not block on child completion.
    async fn create_parent_job(
        &self,
        step: &Step,
        def: &JobDefinition,
        ctx: &ManagerContext<C>,
    ) -> Result<JobId, EngineError>;
}

pub struct ManagerRegistry<C: Clock> {
    by_action: HashMap<&'static str, Arc<dyn Manager<C>>>,
}

impl<C: Clock> Default for ManagerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ManagerRegistry<C> {
    pub fn new() -> Self {
        Self { by_action: HashMap::new() }
    }

    pub fn register(&mut self, manager: Arc<dyn Manager<C>>) {
        tracing::info!(action = manager.action_type(), "manager registered");
        self.by_action.insert(manager.action_type(), manager);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn Manager<C>>> {
        self.by_action.get(action_type).cloned()
    }

    pub fn action_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.by_action.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

/// Deserialize a step's merged config into a typed manager config.
///
/// Unknown keys pass through untouched on the raw map; only the typed
/// fields are validated here.
pub fn typed_config<T: serde::de::DeserializeOwned>(
    step: &Step,
    merged: &Map<String, Value>,
) -> Result<T, EngineError> {
    serde_json::from_value(Value::Object(merged.clone()))
        .map_err(|e| EngineError::invalid_config(&step.name, e.to_string()))
}
