// SPDX-License-Identifier: MIT

//! Search managers: place lookups and web searches, one child per query.

use crate::error::EngineError;
use crate::manager::{typed_config, Manager, ManagerContext};
use quaero_core::{Clock, JobId};
use quaero_definition::{JobDefinition, Step};
use serde::Deserialize;
use serde_json::json;

pub const PLACES_QUERY_TYPE: &str = "places_search_query";
pub const WEB_QUERY_TYPE: &str = "web_search_query";

#[derive(Debug, Deserialize)]
struct PlacesConfig {
    queries: Vec<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    radius_km: Option<f64>,
}

pub struct PlacesSearchManager;

#[async_trait::async_trait]
impl<C: Clock> Manager<C> for PlacesSearchManager {
    fn action_type(&self) -> &'static str {
        "places_search"
    }

    async fn create_parent_job(
        &self,
        step: &Step,
        def: &JobDefinition,
        ctx: &ManagerContext<C>,
    ) -> Result<JobId, EngineError> {
        let merged = def.step_config(step);
        let config: PlacesConfig = typed_config(step, &merged)?;
        if config.queries.is_empty() {
            return Err(EngineError::invalid_config(&step.name, "queries must not be empty"));
        }
        if config.radius_km.is_some_and(|r| r <= 0.0) {
            return Err(EngineError::invalid_config(&step.name, "radius_km must be positive"));
        }

        let children = config
            .queries
            .iter()
            .map(|query| {
                let mut child_config = merged.clone();
                child_config.insert("query".into(), json!(query));
                if let Some(location) = &config.location {
                    child_config.insert("location".into(), json!(location));
                }
                ManagerContext::<C>::child(PLACES_QUERY_TYPE, query.clone(), child_config)
            })
            .collect();

        ctx.spawn_parent(def, step, children)
    }
}

#[derive(Debug, Deserialize)]
struct WebSearchConfig {
    queries: Vec<String>,
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn default_max_results() -> usize {
    10
}

pub struct WebSearchManager;

#[async_trait::async_trait]
impl<C: Clock> Manager<C> for WebSearchManager {
    fn action_type(&self) -> &'static str {
        "web_search"
    }

    async fn create_parent_job(
        &self,
        step: &Step,
        def: &JobDefinition,
        ctx: &ManagerContext<C>,
    ) -> Result<JobId, EngineError> {
        let merged = def.step_config(step);
        let config: WebSearchConfig = typed_config(step, &merged)?;
        if config.queries.is_empty() {
            return Err(EngineError::invalid_config(&step.name, "queries must not be empty"));
        }
        if config.max_results == 0 {
            return Err(EngineError::invalid_config(&step.name, "max_results must be positive"));
        }

        let children = config
            .queries
            .iter()
            .map(|query| {
                let mut child_config = merged.clone();
                child_config.insert("query".into(), json!(query));
                child_config.insert("max_results".into(), json!(config.max_results));
                ManagerContext::<C>::child(WEB_QUERY_TYPE, query.clone(), child_config)
            })
            .collect();

        ctx.spawn_parent(def, step, children)
    }
}
