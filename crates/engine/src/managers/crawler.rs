// SPDX-License-Identifier: MIT

//! Web-crawl manager: seed URLs fan out into `crawler_url` children.

use crate::error::EngineError;
use crate::manager::{typed_config, ChildSpec, Manager, ManagerContext};
use quaero_core::{Clock, JobId};
use quaero_definition::{JobDefinition, Step};
use serde::Deserialize;
use serde_json::json;

/// Job type tag of crawl children.
pub const CRAWLER_URL_TYPE: &str = "crawler_url";

#[derive(Debug, Deserialize)]
pub struct CrawlerConfig {
    pub start_urls: Vec<String>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_true")]
    pub follow_links: bool,
    /// Minimum delay between fetches, per child.
    #[serde(default)]
    pub rate_ms: u64,
    /// Auth connector id resolved by the fetch layer.
    #[serde(default)]
    pub auth_connector: Option<String>,
}

fn default_max_depth() -> u32 {
    2
}

fn default_max_pages() -> usize {
    500
}

fn default_true() -> bool {
    true
}

impl CrawlerConfig {
    fn validate(&self, step: &Step) -> Result<(), EngineError> {
        if self.start_urls.is_empty() {
            return Err(EngineError::invalid_config(&step.name, "start_urls must not be empty"));
        }
        for url in &self.start_urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(EngineError::invalid_config(
                    &step.name,
                    format!("start url {url:?} is not http(s)"),
                ));
            }
        }
        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            regex::Regex::new(pattern).map_err(|e| {
                EngineError::invalid_config(&step.name, format!("bad pattern {pattern:?}: {e}"))
            })?;
        }
        if self.max_pages == 0 {
            return Err(EngineError::invalid_config(&step.name, "max_pages must be positive"));
        }
        Ok(())
    }
}

pub struct CrawlerManager;

#[async_trait::async_trait]
impl<C: Clock> Manager<C> for CrawlerManager {
    fn action_type(&self) -> &'static str {
        "crawler"
    }

    async fn create_parent_job(
        &self,
        step: &Step,
        def: &JobDefinition,
        ctx: &ManagerContext<C>,
    ) -> Result<JobId, EngineError> {
        let merged = def.step_config(step);
        let config: CrawlerConfig = typed_config(step, &merged)?;
        config.validate(step)?;

        let children = config
            .start_urls
            .iter()
            .take(config.max_pages)
            .map(|url| {
                let mut child_config = merged.clone();
                child_config.insert("url".into(), json!(url));
                child_config.insert("depth".into(), json!(0));
                ManagerContext::<C>::child(CRAWLER_URL_TYPE, url.clone(), child_config)
            })
            .collect::<Vec<ChildSpec>>();

        ctx.spawn_parent(def, step, children)
    }
}
