// SPDX-License-Identifier: MIT

//! Log-recursion resistance: a storm of log events produces linear, not
//! quadratic, growth anywhere in the pipeline.

use super::helpers::started_rig;
use quaero_core::test_support::parent_job;
use quaero_core::{Event, EventKind, JobId, JobLogEntry, LogLevel};
use quaero_storage::{LogOrder, LogQuery};
use std::time::Duration;

const STORM: usize = 10_000;

#[tokio::test(start_paused = true)]
async fn log_event_storm_stays_linear() {
    let rig = started_rig().await;
    rig.engine.jobs().save(&parent_job("job-noisy", "storm")).unwrap();
    let job_id = JobId::from_string("job-noisy");

    let (_, mut rx) = rig.engine.bus().subscribe_channel(EventKind::LogEvent);

    for i in 0..STORM {
        rig.engine.job_logger().info(job_id, format!("burst line {i}"));
    }

    // Every line is republished exactly once.
    let mut received = 0;
    while received < STORM {
        match tokio::time::timeout(Duration::from_secs(30), rx.recv()).await {
            Ok(Some(Event::LogEvent { .. })) => received += 1,
            Ok(Some(other)) => panic!("unexpected event {other:?}"),
            Ok(None) | Err(_) => panic!("log event stream dried up at {received}"),
        }
    }
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err(), "more republications than log lines");

    // And persisted exactly once: growth is linear in the input.
    let page = rig
        .engine
        .jobs()
        .get_logs(
            &job_id,
            &LogQuery { limit: STORM * 2, order: LogOrder::Asc, ..LogQuery::default() },
        )
        .unwrap();
    assert_eq!(page.entries.len(), STORM);

    rig.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn direct_log_event_publications_reach_all_subscribers() {
    let rig = started_rig().await;
    let (_, mut rx_a) = rig.engine.bus().subscribe_channel(EventKind::LogEvent);
    let (_, mut rx_b) = rig.engine.bus().subscribe_channel(EventKind::LogEvent);

    for i in 0..STORM {
        rig.engine.bus().publish(Event::LogEvent {
            entry: JobLogEntry::new(
                JobId::from_string("job-ext"),
                i as u64 + 1,
                LogLevel::Info,
                format!("external line {i}"),
            ),
        });
    }

    for rx in [&mut rx_a, &mut rx_b] {
        for _ in 0..STORM {
            assert!(rx.recv().await.is_some());
        }
        assert!(rx.try_recv().is_err());
    }

    rig.engine.shutdown().await;
}
