// SPDX-License-Identifier: MIT

use super::*;
use parking_lot::Mutex;
use quaero_core::{JobId, JobLogEntry, JobStatus, LogLevel};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

fn status_event(job: &str) -> Event {
    Event::JobStatusChange {
        job_id: JobId::from_string(job),
        parent_id: None,
        from: JobStatus::Queued,
        to: JobStatus::Running,
        error: None,
    }
}

fn log_event(job: &str, message: &str) -> Event {
    Event::LogEvent {
        entry: JobLogEntry::new(JobId::from_string(job), 1, LogLevel::Info, message),
    }
}

struct CountingHandler {
    seen: Arc<Mutex<Vec<Event>>>,
}

#[async_trait::async_trait]
impl EventHandler for CountingHandler {
    async fn handle(&self, event: &Event) -> Result<(), CoreError> {
        self.seen.lock().push(event.clone());
        Ok(())
    }
}

struct FailingHandler;

#[async_trait::async_trait]
impl EventHandler for FailingHandler {
    async fn handle(&self, _event: &Event) -> Result<(), CoreError> {
        Err(CoreError::new(ErrorKind::EventHandler, "boom"))
    }
}

#[tokio::test]
async fn publish_reaches_matching_subscribers_only() {
    let bus = EventBus::new();
    let (_, mut status_rx) = bus.subscribe_channel(EventKind::JobStatusChange);
    let (_, mut progress_rx) = bus.subscribe_channel(EventKind::JobProgress);

    bus.publish(status_event("job-1"));

    let received = status_rx.recv().await.unwrap();
    assert_eq!(received.job_id(), Some(JobId::from_string("job-1")));
    assert!(progress_rx.try_recv().is_err());
}

#[tokio::test]
async fn per_subscriber_order_is_publication_order() {
    let bus = EventBus::new();
    let (_, mut rx) = bus.subscribe_channel(EventKind::JobStatusChange);

    for i in 0..100 {
        bus.publish(status_event(&format!("job-{i}")));
    }
    for i in 0..100 {
        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id(), Some(JobId::from_string(format!("job-{i}"))));
    }
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let bus = EventBus::new();
    let (id, mut rx) = bus.subscribe_channel(EventKind::JobStatusChange);
    bus.publish(status_event("job-1"));
    assert!(rx.recv().await.is_some());

    bus.unsubscribe(id);
    assert_eq!(bus.subscriber_count(EventKind::JobStatusChange), 0);
    bus.publish(status_event("job-2"));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn publish_sync_aggregates_first_error_but_reaches_everyone() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe(EventKind::JobStatusChange, Arc::new(FailingHandler));
    bus.subscribe(EventKind::JobStatusChange, Arc::new(CountingHandler { seen: seen.clone() }));

    let err = bus.publish_sync(&status_event("job-1")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::EventHandler);
    // The failing first subscriber did not block the second.
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test]
async fn failing_async_handler_does_not_poison_others() {
    let bus = EventBus::new();
    bus.subscribe(EventKind::JobStatusChange, Arc::new(FailingHandler));
    let (_, mut rx) = bus.subscribe_channel(EventKind::JobStatusChange);

    bus.publish(status_event("job-1"));
    bus.publish(status_event("job-2"));
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_some());
}

/// Counts emitted tracing lines whose `kind` field is `log:event`.
struct LogEventLineCounter {
    count: Arc<AtomicUsize>,
}

struct KindVisitor {
    matched: bool,
}

impl Visit for KindVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "kind" && format!("{value:?}").contains("log:event") {
            self.matched = true;
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "kind" && value.contains("log:event") {
            self.matched = true;
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogEventLineCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = KindVisitor { matched: false };
        event.record(&mut visitor);
        if visitor.matched {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn log_event_publications_emit_zero_bus_log_lines() {
    let bus = EventBus::new();
    let (_, mut rx) = bus.subscribe_channel(EventKind::LogEvent);

    let count = Arc::new(AtomicUsize::new(0));
    let layer = LogEventLineCounter { count: count.clone() };
    let subscriber = tracing_subscriber::registry().with(layer);

    let publishes = 10_000;
    tracing::subscriber::with_default(subscriber, || {
        for i in 0..publishes {
            bus.publish(log_event("job-1", &format!("line {i}")));
        }
    });

    // Every subscriber still receives every event.
    for _ in 0..publishes {
        assert!(rx.recv().await.is_some());
    }
    // And the bus logged none of them.
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn loggable_publications_do_emit_a_trace_line() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    struct AnyKindCounter {
        count: Arc<AtomicUsize>,
    }
    impl<S: tracing::Subscriber> Layer<S> for AnyKindCounter {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    let subscriber = tracing_subscriber::registry().with(AnyKindCounter { count: count.clone() });
    tracing::subscriber::with_default(subscriber, || {
        bus.publish(status_event("job-1"));
    });
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
