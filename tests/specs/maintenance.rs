// SPDX-License-Identifier: MIT

//! Database-maintenance scenarios: the happy path and the parent-type
//! canonicity guard rail.

use super::helpers::{await_status, put_def, started_rig};
use quaero_core::{ErrorKind, Event, EventKind, JobStatus, QueueJob};
use quaero_storage::EnqueueOptions;
use serde_json::json;

const DB_MAINT: &str = r#"
id = "db-maint"
name = "DB Maintenance"

[[steps]]
name = "maint"
type = "database_maintenance"
"#;

#[tokio::test(start_paused = true)]
async fn maintenance_happy_path() {
    let rig = started_rig().await;
    put_def(&rig, DB_MAINT);
    let (_, mut progress_rx) = rig.engine.bus().subscribe_channel(EventKind::JobProgress);

    let parents = rig.engine.run_definition("db-maint").await.unwrap();
    assert_eq!(parents.len(), 1);

    let parent = await_status(&rig, &parents[0], JobStatus::Completed).await;
    assert_eq!(parent.document_count(), 0);

    let children = rig.engine.list_children(&parents[0]).unwrap();
    assert_eq!(children.len(), 3);
    for child in &children {
        assert_eq!(child.status, JobStatus::Completed);
    }

    // At least one progress event, and the final one shows 3/3 complete.
    let mut last = None;
    while let Ok(event) = progress_rx.try_recv() {
        last = Some(event);
    }
    match last.expect("monitor published no job:progress events") {
        Event::JobProgress { progress, .. } => {
            assert_eq!(progress.completed, 3);
            assert_eq!(progress.total, 3);
            assert_eq!(progress.failed, 0);
        }
        other => panic!("unexpected event {other:?}"),
    }

    rig.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn parent_type_mismatch_regression() {
    let rig = started_rig().await;

    // A buggy manager stamps an action-specific parent tag instead of the
    // canonical one and enqueues the usual children.
    let parent = QueueJob::builder()
        .id("job-rogue-parent")
        .job_type("database_maintenance_parent")
        .name("db-maint:maint")
        .build();
    rig.engine.jobs().save(&parent).unwrap();

    let mut children = Vec::new();
    for op in ["VACUUM", "ANALYZE", "REINDEX"] {
        let mut config = serde_json::Map::new();
        config.insert("operation".into(), json!(op));
        let child = QueueJob::builder()
            .id(format!("job-rogue-{op}"))
            .parent_id(parent.id)
            .job_type("database_maintenance_operation")
            .name(op)
            .config(config)
            .build();
        rig.engine.jobs().save(&child).unwrap();
        rig.engine.queue().enqueue(child.clone(), EnqueueOptions::default()).unwrap();
        rig.engine.jobs().update_status(&child.id, JobStatus::Queued, None).unwrap();
        children.push(child);
    }

    rig.engine.monitor_parent(parent.id).unwrap();

    // The monitor rejects the tag and fails the parent...
    let parent_state = await_status(&rig, &parent.id, JobStatus::Failed).await;
    assert_eq!(
        parent_state.last_error.as_ref().map(|e| e.kind),
        Some(ErrorKind::InvalidJobType)
    );

    // ...while the children still execute to completion.
    for child in &children {
        await_status(&rig, &child.id, JobStatus::Completed).await;
    }

    rig.engine.shutdown().await;
}
