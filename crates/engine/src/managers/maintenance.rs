// SPDX-License-Identifier: MIT

//! Database maintenance manager: a fixed operation set fans out into
//! `database_maintenance_operation` children.

use crate::error::EngineError;
use crate::manager::{typed_config, Manager, ManagerContext};
use quaero_core::{Clock, JobId};
use quaero_definition::{JobDefinition, Step};
use serde::Deserialize;
use serde_json::json;

/// Job type tag of maintenance children.
pub const MAINTENANCE_OPERATION_TYPE: &str = "database_maintenance_operation";

/// Operations run by default, in order.
pub const MAINTENANCE_OPERATIONS: [&str; 3] = ["VACUUM", "ANALYZE", "REINDEX"];

#[derive(Debug, Deserialize)]
pub struct MaintenanceConfig {
    /// Subset of the known operations; defaults to all of them.
    #[serde(default)]
    pub operations: Vec<String>,
}

pub struct DatabaseMaintenanceManager;

#[async_trait::async_trait]
impl<C: Clock> Manager<C> for DatabaseMaintenanceManager {
    fn action_type(&self) -> &'static str {
        "database_maintenance"
    }

    async fn create_parent_job(
        &self,
        step: &Step,
        def: &JobDefinition,
        ctx: &ManagerContext<C>,
    ) -> Result<JobId, EngineError> {
        let merged = def.step_config(step);
        let config: MaintenanceConfig = typed_config(step, &merged)?;

        let operations: Vec<String> = if config.operations.is_empty() {
            MAINTENANCE_OPERATIONS.iter().map(|s| s.to_string()).collect()
        } else {
            config.operations
        };
        for op in &operations {
            if !MAINTENANCE_OPERATIONS.contains(&op.as_str()) {
                return Err(EngineError::invalid_config(
                    &step.name,
                    format!("unknown maintenance operation {op:?}"),
                ));
            }
        }

        let children = operations
            .into_iter()
            .map(|op| {
                let mut child_config = merged.clone();
                child_config.insert("operation".into(), json!(op));
                ManagerContext::<C>::child(MAINTENANCE_OPERATION_TYPE, op, child_config)
            })
            .collect();

        ctx.spawn_parent(def, step, children)
    }
}
