// SPDX-License-Identifier: MIT

//! Transform and reindex managers.

use crate::error::EngineError;
use crate::manager::{typed_config, Manager, ManagerContext};
use quaero_core::{Clock, JobId};
use quaero_definition::{JobDefinition, Step};
use serde::Deserialize;
use serde_json::json;

pub const TRANSFORM_TASK_TYPE: &str = "transform_task";
pub const REINDEX_OPERATION_TYPE: &str = "reindex_operation";

#[derive(Debug, Deserialize)]
struct TransformConfig {
    /// Document collections or tag selectors to run the transformer over.
    targets: Vec<String>,
    transformer: String,
}

pub struct TransformManager;

#[async_trait::async_trait]
impl<C: Clock> Manager<C> for TransformManager {
    fn action_type(&self) -> &'static str {
        "transform"
    }

    async fn create_parent_job(
        &self,
        step: &Step,
        def: &JobDefinition,
        ctx: &ManagerContext<C>,
    ) -> Result<JobId, EngineError> {
        let merged = def.step_config(step);
        let config: TransformConfig = typed_config(step, &merged)?;
        if config.targets.is_empty() {
            return Err(EngineError::invalid_config(&step.name, "targets must not be empty"));
        }
        if config.transformer.trim().is_empty() {
            return Err(EngineError::invalid_config(&step.name, "transformer must not be empty"));
        }

        let children = config
            .targets
            .iter()
            .map(|target| {
                let mut child_config = merged.clone();
                child_config.insert("target".into(), json!(target));
                child_config.insert("transformer".into(), json!(config.transformer));
                ManagerContext::<C>::child(TRANSFORM_TASK_TYPE, target.clone(), child_config)
            })
            .collect();

        ctx.spawn_parent(def, step, children)
    }
}

#[derive(Debug, Deserialize)]
struct ReindexConfig {
    #[serde(default = "default_indices")]
    indices: Vec<String>,
}

fn default_indices() -> Vec<String> {
    vec!["documents".to_string()]
}

pub struct ReindexManager;

#[async_trait::async_trait]
impl<C: Clock> Manager<C> for ReindexManager {
    fn action_type(&self) -> &'static str {
        "reindex"
    }

    async fn create_parent_job(
        &self,
        step: &Step,
        def: &JobDefinition,
        ctx: &ManagerContext<C>,
    ) -> Result<JobId, EngineError> {
        let merged = def.step_config(step);
        let config: ReindexConfig = typed_config(step, &merged)?;
        if config.indices.is_empty() {
            return Err(EngineError::invalid_config(&step.name, "indices must not be empty"));
        }

        let children = config
            .indices
            .iter()
            .map(|index| {
                let mut child_config = merged.clone();
                child_config.insert("index".into(), json!(index));
                ManagerContext::<C>::child(REINDEX_OPERATION_TYPE, index.clone(), child_config)
            })
            .collect();

        ctx.spawn_parent(def, step, children)
    }
}
