// SPDX-License-Identifier: MIT

//! Aggregated-log contracts: hard NotFound for missing jobs, graceful
//! degradation for broken metadata.

use super::helpers::rig;
use quaero_core::{ErrorKind, FakeClock, JobId, JobLogEntry, LogLevel, NullSink};
use quaero_core::test_support::{child_job, parent_job};
use quaero_storage::{JobStore, KeyValue, LogQuery, MemoryStore};
use std::sync::Arc;

#[tokio::test]
async fn logs_of_non_existent_job_are_not_found() {
    let rig = rig();
    let err = rig
        .engine
        .aggregated_logs(&JobId::from_string("non-existent-12345"), true, &LogQuery::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn logs_with_broken_metadata_enrichment_degrade_gracefully() {
    let kv: Arc<dyn KeyValue> = Arc::new(MemoryStore::new());
    let jobs = JobStore::new(kv.clone(), Arc::new(NullSink), FakeClock::new());

    jobs.save(&parent_job("job-j", "crawl")).unwrap();
    jobs.save(&child_job("job-j-c1", "job-j", "crawler_url")).unwrap();
    jobs.append_log(JobLogEntry::new(JobId::from_string("job-j"), 10, LogLevel::Info, "started"))
        .unwrap();
    jobs.append_log(JobLogEntry::new(
        JobId::from_string("job-j-c1"),
        20,
        LogLevel::Info,
        "child fetched",
    ))
    .unwrap();

    // Break the metadata record for the job itself.
    kv.put("jobmeta/job-j", b"\xff\xfenot json".to_vec()).unwrap();

    let logs = jobs
        .aggregated_logs(&JobId::from_string("job-j"), true, &LogQuery::default())
        .unwrap();
    assert_eq!(logs.entries.len(), 2);
    assert!(logs.metadata.is_empty());
}
