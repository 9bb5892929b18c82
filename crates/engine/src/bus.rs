// SPDX-License-Identifier: MIT

//! Typed in-process publish/subscribe.
//!
//! Each subscriber owns an unbounded channel drained by its own task, so
//! `publish` returns immediately and per-subscriber delivery order matches
//! publication order. `publish_sync` dispatches inline and aggregates the
//! first handler error.

use parking_lot::RwLock;
use quaero_core::{CoreError, ErrorKind, Event, EventKind, EventSink, SubscriptionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A subscriber's callback.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), CoreError>;
}

/// Channel senders forward events verbatim; the common way to pump bus
/// events into a task's select loop.
#[async_trait::async_trait]
impl EventHandler for mpsc::UnboundedSender<Event> {
    async fn handle(&self, event: &Event) -> Result<(), CoreError> {
        self.send(event.clone())
            .map_err(|_| CoreError::new(ErrorKind::EventHandler, "subscriber channel closed"))
    }
}

struct Subscriber {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    tx: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<HashMap<EventKind, Vec<Subscriber>>>,
}

/// The event bus. Cheap to clone; clones share the subscriber table.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind. The handler runs on its own
    /// drain task; a failing handler is logged and delivery continues.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let drain_handler = handler.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = drain_handler.handle(&event).await {
                    tracing::error!(kind = %event.kind(), error = %e, "event handler failed");
                }
            }
        });
        self.inner
            .subscribers
            .write()
            .entry(kind)
            .or_default()
            .push(Subscriber { id, handler, tx });
        id
    }

    /// Subscribe with a fresh channel; the receiver sees every event of
    /// `kind` in publication order.
    pub fn subscribe_channel(
        &self,
        kind: EventKind,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let id = self.subscribe(kind, Arc::new(tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut table = self.inner.subscribers.write();
        for subs in table.values_mut() {
            subs.retain(|s| s.id != id);
        }
    }

    /// Deliver asynchronously to all subscribers of the event's kind.
    ///
    /// Publications of non-loggable kinds (`log:event`) emit no log line
    /// here: the log consumer republishes log lines as events, and a bus log
    /// line per publication would feed that cycle.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let senders: Vec<mpsc::UnboundedSender<Event>> = {
            let table = self.inner.subscribers.read();
            table.get(&kind).map(|subs| subs.iter().map(|s| s.tx.clone()).collect()).unwrap_or_default()
        };
        if kind.is_loggable() {
            tracing::trace!(kind = %kind, subscribers = senders.len(), "event published");
        }
        for tx in senders {
            let _ = tx.send(event.clone());
        }
    }

    /// Deliver inline, blocking until every subscriber returns.
    ///
    /// All subscribers run even when one fails; the first error is returned
    /// with kind `EventHandler`.
    pub async fn publish_sync(&self, event: &Event) -> Result<(), CoreError> {
        let kind = event.kind();
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let table = self.inner.subscribers.read();
            table
                .get(&kind)
                .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };
        if kind.is_loggable() {
            tracing::trace!(kind = %kind, subscribers = handlers.len(), "event published sync");
        }
        let mut first_error = None;
        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!(kind = %kind, error = %e, "event handler failed");
                if first_error.is_none() {
                    first_error = Some(CoreError::new(ErrorKind::EventHandler, e.to_string()));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.subscribers.read().get(&kind).map(Vec::len).unwrap_or(0)
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: Event) {
        EventBus::publish(self, event);
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
