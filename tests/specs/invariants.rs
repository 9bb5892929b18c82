// SPDX-License-Identifier: MIT

//! Cross-cutting invariants: terminal latching, metadata merge, document
//! count accuracy, and handler idempotency at the engine level.

use super::helpers::{await_status, put_def, rig_with, started_rig};
use quaero_core::{CoreError, JobStatus, QueueJob};
use quaero_engine::{EngineConfig, EngineDeps, Worker, WorkerContext};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn terminal_status_is_latched() {
    let rig = started_rig().await;
    let jobs = rig.engine.jobs();
    jobs.save(&quaero_core::test_support::parent_job("job-p1", "latch")).unwrap();
    jobs.update_status(&"job-p1".into(), JobStatus::Running, None).unwrap();
    jobs.set_finished(&"job-p1".into(), JobStatus::Completed, None).unwrap();

    for next in [JobStatus::Pending, JobStatus::Queued, JobStatus::Running, JobStatus::Failed] {
        assert!(jobs.update_status(&"job-p1".into(), next, None).is_err());
    }
    assert_eq!(rig.engine.get_job(&"job-p1".into()).unwrap().status, JobStatus::Completed);
    rig.engine.shutdown().await;
}

#[tokio::test]
async fn metadata_merge_preserves_unrelated_keys() {
    let rig = started_rig().await;
    let jobs = rig.engine.jobs();
    jobs.save(&quaero_core::test_support::parent_job("job-p1", "merge")).unwrap();

    let mut patch = serde_json::Map::new();
    patch.insert("a".into(), json!(1));
    jobs.patch_metadata(&"job-p1".into(), &patch).unwrap();

    let mut patch = serde_json::Map::new();
    patch.insert("b".into(), json!(2));
    let state = jobs.patch_metadata(&"job-p1".into(), &patch).unwrap();

    assert_eq!(state.metadata["a"], 1);
    assert_eq!(state.metadata["b"], 2);
    rig.engine.shutdown().await;
}

/// Publishes two documents per execution with ids derived from the job, so
/// re-execution yields the same id set.
struct DocWorker;

#[async_trait::async_trait]
impl Worker for DocWorker {
    fn job_type(&self) -> &'static str {
        "crawler_url"
    }

    async fn execute(&self, ctx: &WorkerContext, job: &QueueJob) -> Result<(), CoreError> {
        ctx.document_saved(job, format!("{}#0", job.name));
        ctx.document_saved(job, format!("{}#1", job.name));
        Ok(())
    }
}

const TWO_URL_CRAWL: &str = r#"
id = "doc-crawl"
name = "Doc Crawl"

[[steps]]
name = "crawl"
type = "crawler"

[steps.config]
start_urls = ["https://example.com/a", "https://example.com/b"]
follow_links = false
"#;

#[tokio::test(start_paused = true)]
async fn document_count_matches_published_events() {
    let rig = rig_with(
        EngineConfig::default(),
        EngineDeps { fetcher: None, extra_workers: vec![Arc::new(DocWorker)] },
    );
    rig.engine.start().await.unwrap();
    put_def(&rig, TWO_URL_CRAWL);

    let parents = rig.engine.run_definition("doc-crawl").await.unwrap();
    let parent = await_status(&rig, &parents[0], JobStatus::Completed).await;

    // Two children, two documents each.
    assert_eq!(parent.document_count(), 4);
    rig.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn worker_execution_is_idempotent() {
    use parking_lot::Mutex;
    use quaero_core::{Event, EventKind};

    let rig = rig_with(
        EngineConfig::default(),
        EngineDeps { fetcher: None, extra_workers: vec![Arc::new(DocWorker)] },
    );
    let (_, mut doc_rx) = rig.engine.bus().subscribe_channel(EventKind::DocumentSaved);

    let seen = Mutex::new(Vec::<String>::new());
    let job = QueueJob::builder().id("job-idem").job_type("crawler_url").name("page").build();
    rig.engine.jobs().save(&job).unwrap();

    let ctx = WorkerContext {
        cancel: tokio_util::sync::CancellationToken::new(),
        logger: rig.engine.job_logger().clone(),
        events: Arc::new(rig.engine.bus().clone()),
    };
    // Same job executed twice (visibility timeout elapsed before ack).
    DocWorker.execute(&ctx, &job).await.unwrap();
    DocWorker.execute(&ctx, &job).await.unwrap();

    while let Ok(event) = doc_rx.try_recv() {
        if let Event::DocumentSaved { document_id, .. } = event {
            seen.lock().push(document_id);
        }
    }
    let mut ids = seen.into_inner();
    assert_eq!(ids.len(), 4);
    ids.sort();
    ids.dedup();
    // Duplicate ids collapse to the same document set.
    assert_eq!(ids, vec!["page#0".to_string(), "page#1".to_string()]);
}
