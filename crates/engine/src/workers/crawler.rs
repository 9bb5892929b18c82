// SPDX-License-Identifier: MIT

//! Worker for `crawler_url` jobs.
//!
//! The actual HTTP/rendering stack is an external collaborator behind
//! [`Fetcher`]; this worker owns the crawl semantics: fetch one URL,
//! publish the document, and expand in-scope links into further children
//! of the same parent.

use crate::worker::{Worker, WorkerContext};
use quaero_core::{Clock, CoreError, ErrorKind, JobId, JobStatus, QueueJob};
use quaero_storage::{EnqueueOptions, JobStore, Queue};
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// One fetched page: its final URL, extracted text, and outgoing links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub content: String,
    pub links: Vec<String>,
}

/// Seam to the HTTP/headless-browser layer.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CoreError>;
}

pub struct CrawlerUrlWorker<C: Clock> {
    fetcher: Arc<dyn Fetcher>,
    jobs: Arc<JobStore<C>>,
    queue: Arc<Queue<C>>,
    clock: C,
}

impl<C: Clock> CrawlerUrlWorker<C> {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        jobs: Arc<JobStore<C>>,
        queue: Arc<Queue<C>>,
        clock: C,
    ) -> Self {
        Self { fetcher, jobs, queue, clock }
    }

    fn in_scope(job: &QueueJob, url: &str) -> bool {
        let includes: Vec<String> = job
            .config
            .get("include_patterns")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let excludes: Vec<String> = job
            .config
            .get("exclude_patterns")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let matches = |patterns: &[String]| {
            patterns
                .iter()
                .filter_map(|p| regex::Regex::new(p).ok())
                .any(|re| re.is_match(url))
        };
        if matches(&excludes) {
            return false;
        }
        includes.is_empty() || matches(&includes)
    }

    /// Deterministic child id per URL, so re-executions cannot spawn
    /// duplicate children for the same link.
    fn child_id(url: &str) -> JobId {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        JobId::from_string(format!("job-{:016x}", hasher.finish()))
    }

    fn expand_links(
        &self,
        job: &QueueJob,
        depth: u64,
        max_depth: u64,
        links: &[String],
    ) -> Result<usize, CoreError> {
        let Some(parent_id) = job.parent_id else {
            return Ok(0);
        };
        if depth >= max_depth {
            return Ok(0);
        }
        let mut spawned = 0;
        for link in links {
            if !Self::in_scope(job, link) {
                continue;
            }
            let child_id = Self::child_id(link);
            if self.jobs.exists(&child_id).map_err(to_core)? {
                continue;
            }
            let mut config = job.config.clone();
            config.insert("url".into(), json!(link));
            config.insert("depth".into(), json!(depth + 1));
            let child = QueueJob {
                id: child_id,
                parent_id: Some(parent_id),
                job_type: "crawler_url".to_string(),
                name: link.clone(),
                created_at_ms: self.clock.epoch_ms(),
                config,
                tags: job.tags.clone(),
                priority: job.priority,
            };
            self.jobs.save(&child).map_err(to_core)?;
            self.queue.enqueue(child.clone(), EnqueueOptions::default()).map_err(to_core)?;
            self.jobs.update_status(&child.id, JobStatus::Queued, None).map_err(to_core)?;
            spawned += 1;
        }
        Ok(spawned)
    }
}

fn to_core(e: quaero_storage::StorageError) -> CoreError {
    CoreError::new(e.kind(), e.to_string())
}

#[async_trait::async_trait]
impl<C: Clock> Worker for CrawlerUrlWorker<C> {
    fn job_type(&self) -> &'static str {
        "crawler_url"
    }

    fn validate(&self, job: &QueueJob) -> Result<(), CoreError> {
        match job.config_str("url") {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
            Some(url) => {
                Err(CoreError::new(ErrorKind::InvalidConfig, format!("bad url {url:?}")))
            }
            None => Err(CoreError::new(ErrorKind::InvalidConfig, "missing url")),
        }
    }

    async fn execute(&self, ctx: &WorkerContext, job: &QueueJob) -> Result<(), CoreError> {
        // validate() guarantees the URL is present.
        let url = job.config_str("url").unwrap_or_default().to_string();
        let depth = job.config.get("depth").and_then(|v| v.as_u64()).unwrap_or(0);
        let max_depth = job.config.get("max_depth").and_then(|v| v.as_u64()).unwrap_or(2);
        let follow_links =
            job.config.get("follow_links").and_then(|v| v.as_bool()).unwrap_or(true);
        let rate_ms = job.config.get("rate_ms").and_then(|v| v.as_u64()).unwrap_or(0);

        if rate_ms > 0 {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Err(CoreError::new(ErrorKind::Cancelled, "cancelled"));
                }
                _ = tokio::time::sleep(Duration::from_millis(rate_ms)) => {}
            }
        }

        let page = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Err(CoreError::new(ErrorKind::Cancelled, "cancelled"));
            }
            page = self.fetcher.fetch(&url) => page?,
        };

        ctx.logger.with_fields(
            job.id,
            quaero_core::LogLevel::Debug,
            format!("fetched {url}"),
            vec![("bytes", json!(page.content.len())), ("links", json!(page.links.len()))],
        );
        // The URL doubles as the document id: stable across redeliveries.
        ctx.document_saved(job, page.url.clone());

        if follow_links {
            let spawned = self.expand_links(job, depth, max_depth, &page.links)?;
            if spawned > 0 {
                ctx.logger.debug(job.id, format!("spawned {spawned} follow-up fetches"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "crawler_tests.rs"]
mod tests;
