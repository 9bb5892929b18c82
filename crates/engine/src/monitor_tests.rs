// SPDX-License-Identifier: MIT

use super::*;
use crate::job_logger::LogConsumer;
use quaero_core::test_support::{child_job, parent_job};
use quaero_core::{FakeClock, QueueJob};
use quaero_storage::{EnqueueOptions, KeyValue, MemoryStore, QueueConfig};

struct Rig {
    jobs: Arc<JobStore<FakeClock>>,
    queue: Arc<Queue<FakeClock>>,
    bus: EventBus,
    logger: JobLogger,
    clock: FakeClock,
    inflight: Arc<Inflight>,
}

fn rig() -> Rig {
    let clock = FakeClock::new();
    let kv: Arc<dyn KeyValue> = Arc::new(MemoryStore::new());
    let bus = EventBus::new();
    let jobs = Arc::new(JobStore::new(kv.clone(), Arc::new(bus.clone()), clock.clone()));
    let queue = Arc::new(Queue::new(
        kv,
        Arc::new(bus.clone()),
        clock.clone(),
        QueueConfig { visibility_timeout: Duration::from_secs(30), max_receive: 3 },
    ));
    let (logger, _consumer) = LogConsumer::channel(jobs.clone(), bus.clone());
    Rig { jobs, queue, bus, logger, clock, inflight: Arc::new(Inflight::new()) }
}

impl Rig {
    fn monitor(&self, parent_id: &str, config: MonitorConfig) -> ParentMonitor<FakeClock> {
        ParentMonitor::new(
            JobId::from_string(parent_id),
            self.jobs.clone(),
            self.queue.clone(),
            self.bus.clone(),
            self.logger.clone(),
            self.clock.clone(),
            self.inflight.clone(),
            config,
            CancellationToken::new(),
        )
    }

    fn seed_parent(&self, children: usize) -> Vec<QueueJob> {
        self.jobs.save(&parent_job("job-p1", "maint")).unwrap();
        (0..children)
            .map(|i| {
                let child = child_job(&format!("job-c{i}"), "job-p1", "crawler_url");
                self.jobs.save(&child).unwrap();
                self.jobs.update_status(&child.id, JobStatus::Queued, None).unwrap();
                child
            })
            .collect()
    }

    fn finish_child(&self, child: &QueueJob, status: JobStatus) {
        self.jobs.update_status(&child.id, JobStatus::Running, None).unwrap();
        self.jobs.set_finished(&child.id, status, None).unwrap();
    }

    async fn await_status(&self, id: &str, expected: JobStatus) -> quaero_core::QueueJobState {
        let id = JobId::from_string(id);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            let state = self.jobs.state_of(&id).unwrap();
            if state.status == expected {
                return state;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {:?}, wanted {expected:?}",
                state.status
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn parent_completes_when_children_complete() {
    let rig = rig();
    let children = rig.seed_parent(3);
    let (_, mut progress_rx) = rig.bus.subscribe_channel(EventKind::JobProgress);

    let handle = rig.monitor("job-p1", MonitorConfig::default()).spawn();

    rig.await_status("job-p1", JobStatus::Running).await;
    for child in &children {
        rig.finish_child(child, JobStatus::Completed);
    }

    let state = rig.await_status("job-p1", JobStatus::Completed).await;
    assert!(state.finished_at_ms.is_some());
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

    // At least one progress event, and the last one reports full completion.
    let mut last = None;
    while let Ok(event) = progress_rx.try_recv() {
        last = Some(event);
    }
    match last.expect("no progress event published") {
        Event::JobProgress { progress, stats, .. } => {
            assert_eq!(progress.completed, 3);
            assert_eq!(progress.total, 3);
            assert_eq!(stats.completed, 3);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn non_canonical_parent_type_fails_validation() {
    let rig = rig();
    // A manager wrote an action-specific tag instead of the canonical one.
    let bad_parent = QueueJob::builder()
        .id("job-p1")
        .job_type("database_maintenance_parent")
        .name("maint")
        .build();
    rig.jobs.save(&bad_parent).unwrap();
    let child = child_job("job-c1", "job-p1", "crawler_url");
    rig.jobs.save(&child).unwrap();
    rig.jobs.update_status(&child.id, JobStatus::Queued, None).unwrap();

    let handle = rig.monitor("job-p1", MonitorConfig::default()).spawn();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

    let state = rig.jobs.state_of(&JobId::from_string("job-p1")).unwrap();
    assert_eq!(state.status, JobStatus::Failed);
    assert_eq!(state.last_error.as_ref().map(|e| e.kind), Some(ErrorKind::InvalidJobType));

    // Children are untouched and still runnable.
    let child_state = rig.jobs.state_of(&child.id).unwrap();
    assert_eq!(child_state.status, JobStatus::Queued);
    rig.finish_child(&child, JobStatus::Completed);
    assert_eq!(rig.jobs.state_of(&child.id).unwrap().status, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn strict_tolerance_fails_parent_on_any_child_failure() {
    let rig = rig();
    let children = rig.seed_parent(2);
    let handle = rig.monitor("job-p1", MonitorConfig::default()).spawn();
    rig.await_status("job-p1", JobStatus::Running).await;

    rig.finish_child(&children[0], JobStatus::Completed);
    rig.finish_child(&children[1], JobStatus::Failed);

    let state = rig.await_status("job-p1", JobStatus::Failed).await;
    assert_eq!(state.last_error.as_ref().map(|e| e.kind), Some(ErrorKind::StepFailed));
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn continue_on_error_completes_despite_failures() {
    let rig = rig();
    let children = rig.seed_parent(3);
    let config = MonitorConfig { tolerance: ErrorTolerance::ContinueOnError, ..Default::default() };
    let handle = rig.monitor("job-p1", config).spawn();
    rig.await_status("job-p1", JobStatus::Running).await;

    rig.finish_child(&children[0], JobStatus::Completed);
    rig.finish_child(&children[1], JobStatus::Failed);
    rig.finish_child(&children[2], JobStatus::Failed);

    rig.await_status("job-p1", JobStatus::Completed).await;
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn percent_tolerance_uses_spawned_denominator() {
    let rig = rig();
    let children = rig.seed_parent(4);
    let config = MonitorConfig { tolerance: ErrorTolerance::Percent(50), ..Default::default() };
    let handle = rig.monitor("job-p1", config).spawn();
    rig.await_status("job-p1", JobStatus::Running).await;

    // 1 of 4 failed = 25% ≤ 50%: completed.
    rig.finish_child(&children[0], JobStatus::Failed);
    for child in &children[1..] {
        rig.finish_child(child, JobStatus::Completed);
    }

    rig.await_status("job-p1", JobStatus::Completed).await;
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn document_saved_events_accumulate_on_parent() {
    let rig = rig();
    let children = rig.seed_parent(2);
    let handle = rig.monitor("job-p1", MonitorConfig::default()).spawn();
    rig.await_status("job-p1", JobStatus::Running).await;

    for (i, child) in children.iter().enumerate() {
        rig.bus.publish(Event::DocumentSaved {
            job_id: child.id,
            parent_id: Some(JobId::from_string("job-p1")),
            document_id: format!("doc-{i}"),
        });
    }
    // An event scoped to some other parent is ignored.
    rig.bus.publish(Event::DocumentSaved {
        job_id: JobId::from_string("job-other"),
        parent_id: Some(JobId::from_string("job-p2")),
        document_id: "doc-x".into(),
    });

    // Let the monitor absorb the document events before children finish.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while rig.jobs.state_of(&JobId::from_string("job-p1")).unwrap().document_count() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "document count never reached 2");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for child in &children {
        rig.finish_child(child, JobStatus::Completed);
    }
    let state = rig.await_status("job-p1", JobStatus::Completed).await;
    assert_eq!(state.document_count(), 2);
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_parent_and_cancels_children() {
    let rig = rig();
    let children = rig.seed_parent(2);
    // One child is mid-flight; its token must be cancelled.
    rig.jobs.update_status(&children[0].id, JobStatus::Running, None).unwrap();
    let inflight_token = CancellationToken::new();
    rig.inflight.register(children[0].id, inflight_token.clone());

    let config = MonitorConfig { timeout: Some(Duration::from_secs(60)), ..Default::default() };
    let handle = rig.monitor("job-p1", config).spawn();
    rig.await_status("job-p1", JobStatus::Running).await;

    rig.clock.advance(Duration::from_secs(61));

    let state = rig.await_status("job-p1", JobStatus::Failed).await;
    assert_eq!(state.last_error.as_ref().map(|e| e.kind), Some(ErrorKind::Timeout));
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

    // Queued child cancelled outright; running child flagged + token fired.
    assert_eq!(rig.jobs.state_of(&children[1].id).unwrap().status, JobStatus::Cancelled);
    assert!(inflight_token.is_cancelled());
    assert!(rig.jobs.state_of(&children[0].id).unwrap().cancel_requested());
}

#[tokio::test(start_paused = true)]
async fn dead_lettered_child_is_reconciled_to_failed() {
    let rig = rig();
    let children = rig.seed_parent(2);
    rig.finish_child(&children[1], JobStatus::Completed);

    // Child 0's message exhausted redelivery on the receive path while no
    // dispatcher was watching.
    rig.queue.enqueue(children[0].clone(), EnqueueOptions::default()).unwrap();
    for _ in 0..4 {
        let _ = rig.queue.receive("crawler_url", 10).unwrap();
        rig.clock.advance(Duration::from_secs(31));
    }
    assert!(rig.queue.is_dead_lettered("crawler_url", &children[0].id).unwrap());

    let handle = rig.monitor("job-p1", MonitorConfig::default()).spawn();

    let state = rig.await_status("job-p1", JobStatus::Failed).await;
    assert_eq!(state.last_error.as_ref().map(|e| e.kind), Some(ErrorKind::StepFailed));
    assert_eq!(
        rig.jobs.state_of(&children[0].id).unwrap().last_error.map(|e| e.kind),
        Some(ErrorKind::MaxRetriesExceeded)
    );
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_parent_state_untouched() {
    let rig = rig();
    let _children = rig.seed_parent(2);
    let cancel = CancellationToken::new();
    let monitor = ParentMonitor::new(
        JobId::from_string("job-p1"),
        rig.jobs.clone(),
        rig.queue.clone(),
        rig.bus.clone(),
        rig.logger.clone(),
        rig.clock.clone(),
        rig.inflight.clone(),
        MonitorConfig::default(),
        cancel.clone(),
    );
    let handle = monitor.spawn();
    rig.await_status("job-p1", JobStatus::Running).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

    // Still running: adoption after restart picks it back up.
    assert_eq!(
        rig.jobs.state_of(&JobId::from_string("job-p1")).unwrap().status,
        JobStatus::Running
    );
}

#[tokio::test(start_paused = true)]
async fn externally_cancelled_parent_sweeps_children_and_exits() {
    let rig = rig();
    let children = rig.seed_parent(2);
    let handle = rig.monitor("job-p1", MonitorConfig::default()).spawn();
    rig.await_status("job-p1", JobStatus::Running).await;

    rig.jobs
        .set_finished(&JobId::from_string("job-p1"), JobStatus::Cancelled, None)
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
    for child in &children {
        assert_eq!(rig.jobs.state_of(&child.id).unwrap().status, JobStatus::Cancelled);
    }
}
