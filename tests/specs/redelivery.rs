// SPDX-License-Identifier: MIT

//! Worker crash / redelivery: failures requeue until the redelivery limit
//! dead-letters the message and fails the child.

use super::helpers::{await_status, put_def, rig_with};
use quaero_core::{CoreError, ErrorKind, JobStatus, QueueJob};
use quaero_engine::{EngineConfig, EngineDeps, Worker, WorkerContext};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Crawler stand-in that fails every execution.
struct CrashingCrawler {
    attempts: AtomicU32,
}

#[async_trait::async_trait]
impl Worker for CrashingCrawler {
    fn job_type(&self) -> &'static str {
        "crawler_url"
    }

    async fn execute(&self, _ctx: &WorkerContext, job: &QueueJob) -> Result<(), CoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CoreError::new(ErrorKind::Storage, format!("connection reset fetching {}", job.name)))
    }
}

const CRAWL_DEF: &str = r#"
id = "crash-crawl"
name = "Crash Crawl"
error_tolerance = "continue_on_error"

[[steps]]
name = "crawl"
type = "crawler"

[steps.config]
start_urls = ["https://example.com/c"]
follow_links = false
"#;

#[tokio::test(start_paused = true)]
async fn redelivery_until_dead_letter() {
    let worker = Arc::new(CrashingCrawler { attempts: AtomicU32::new(0) });
    let mut config = EngineConfig::default();
    config.queue.max_receive = 5;
    let rig = rig_with(
        config,
        EngineDeps { fetcher: None, extra_workers: vec![worker.clone()] },
    );
    rig.engine.start().await.unwrap();
    put_def(&rig, CRAWL_DEF);

    let parents = rig.engine.run_definition("crash-crawl").await.unwrap();
    let children = rig.engine.list_children(&parents[0]).unwrap();
    assert_eq!(children.len(), 1);
    let child_id = children[0].queue_job.id;

    // The child fails after exhausting all five deliveries.
    let child = await_status(&rig, &child_id, JobStatus::Failed).await;
    assert_eq!(
        child.last_error.as_ref().map(|e| e.kind),
        Some(ErrorKind::MaxRetriesExceeded)
    );
    assert_eq!(worker.attempts.load(Ordering::SeqCst), 5);

    // The message moved to the dead-letter prefix.
    assert!(rig.engine.queue().is_dead_lettered("crawler_url", &child_id).unwrap());
    assert_eq!(rig.engine.queue_stats("crawler_url").unwrap().dead_letter, 1);

    // With continue_on_error the parent still closes (completed: the only
    // child failure is tolerated by policy).
    let parent = await_status(&rig, &parents[0], JobStatus::Completed).await;
    assert_eq!(parent.progress.failed, 1);

    rig.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transient_crash_recovers_on_second_delivery() {
    /// Fails exactly once, then succeeds.
    struct OnceFlaky {
        attempts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Worker for OnceFlaky {
        fn job_type(&self) -> &'static str {
            "crawler_url"
        }

        async fn execute(&self, _ctx: &WorkerContext, _job: &QueueJob) -> Result<(), CoreError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(CoreError::new(ErrorKind::Storage, "transient"));
            }
            Ok(())
        }
    }

    let worker = Arc::new(OnceFlaky { attempts: AtomicU32::new(0) });
    let rig = rig_with(
        EngineConfig::default(),
        EngineDeps { fetcher: None, extra_workers: vec![worker.clone()] },
    );
    rig.engine.start().await.unwrap();
    put_def(&rig, CRAWL_DEF);

    let parents = rig.engine.run_definition("crash-crawl").await.unwrap();
    let children = rig.engine.list_children(&parents[0]).unwrap();
    let child_id = children[0].queue_job.id;

    await_status(&rig, &child_id, JobStatus::Completed).await;
    assert_eq!(worker.attempts.load(Ordering::SeqCst), 2);
    assert!(!rig.engine.queue().is_dead_lettered("crawler_url", &child_id).unwrap());

    await_status(&rig, &parents[0], JobStatus::Completed).await;
    rig.engine.shutdown().await;
}
