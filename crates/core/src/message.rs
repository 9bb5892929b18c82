// SPDX-License-Identifier: MIT

//! Queue-internal message wrapper.

use crate::id::MessageId;
use crate::job::QueueJob;
use serde::{Deserialize, Serialize};

/// A [`QueueJob`] wrapped for transport through the persistent queue.
///
/// Exactly one consumer holds a message at a time: while
/// `visible_at_ms > now` the message is invisible to `receive`. The
/// visibility timeout is the sole mechanism preventing duplicate delivery,
/// so handlers must be idempotent at the job-id level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: MessageId,
    pub queue_name: String,
    pub enqueued_at_ms: u64,
    /// Instant the message becomes (re-)deliverable.
    pub visible_at_ms: u64,
    /// Monotonic count of deliveries; drives the dead-letter limit.
    pub receive_count: u32,
    pub job: QueueJob,
}

impl QueueMessage {
    pub fn new(queue_name: impl Into<String>, enqueued_at_ms: u64, job: QueueJob) -> Self {
        Self {
            message_id: MessageId::new(),
            queue_name: queue_name.into(),
            enqueued_at_ms,
            visible_at_ms: enqueued_at_ms,
            receive_count: 0,
            job,
        }
    }

    /// Whether the message is deliverable at `now_ms`.
    pub fn is_visible(&self, now_ms: u64) -> bool {
        self.visible_at_ms <= now_ms
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
