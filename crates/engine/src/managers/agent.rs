// SPDX-License-Identifier: MIT

//! LLM agent manager: one `agent_task` child per input binding.

use crate::error::EngineError;
use crate::manager::{typed_config, Manager, ManagerContext};
use quaero_core::{Clock, JobId};
use quaero_definition::{JobDefinition, Step};
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Job type tag of agent children.
pub const AGENT_TASK_TYPE: &str = "agent_task";

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    /// One child per binding; an empty list still runs the prompt once.
    #[serde(default)]
    pub inputs: Vec<Map<String, Value>>,
}

pub struct AgentManager;

#[async_trait::async_trait]
impl<C: Clock> Manager<C> for AgentManager {
    fn action_type(&self) -> &'static str {
        "agent"
    }

    async fn create_parent_job(
        &self,
        step: &Step,
        def: &JobDefinition,
        ctx: &ManagerContext<C>,
    ) -> Result<JobId, EngineError> {
        let merged = def.step_config(step);
        let config: AgentConfig = typed_config(step, &merged)?;
        if config.prompt.trim().is_empty() {
            return Err(EngineError::invalid_config(&step.name, "prompt must not be empty"));
        }

        let bindings: Vec<Map<String, Value>> = if config.inputs.is_empty() {
            vec![Map::new()]
        } else {
            config.inputs
        };

        let children = bindings
            .into_iter()
            .enumerate()
            .map(|(i, input)| {
                let mut child_config = merged.clone();
                child_config.insert("input".into(), Value::Object(input));
                child_config.insert("run_index".into(), json!(i));
                ManagerContext::<C>::child(
                    AGENT_TASK_TYPE,
                    format!("{}#{}", step.name, i),
                    child_config,
                )
            })
            .collect();

        ctx.spawn_parent(def, step, children)
    }
}
