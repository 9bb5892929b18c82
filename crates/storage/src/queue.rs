// SPDX-License-Identifier: MIT

//! At-least-once FIFO message queue with visibility timeouts.
//!
//! One queue per job type, keyed `queue/{name}/{enqueued_at}-{seq}` so
//! ordered iteration approximates FIFO. Receiving hides a message for the
//! visibility timeout instead of removing it; a crash between receive and
//! ack makes the message reappear. Handlers must be idempotent per job id.

use crate::error::StorageError;
use crate::keys;
use crate::kv::{BatchOp, KeyValue};
use parking_lot::Mutex;
use quaero_core::{Clock, CoreError, ErrorKind, Event, EventSink, JobId, MessageId, QueueJob, QueueMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub visibility_timeout: Duration,
    /// Deliveries allowed before a message is dead-lettered.
    pub max_receive: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { visibility_timeout: Duration::from_secs(30), max_receive: 5 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Delay before the message becomes deliverable.
    pub visible_after: Option<Duration>,
    /// Overrides the job's own priority for dequeue ordering.
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub dead_letter: usize,
}

pub struct Queue<C: Clock> {
    kv: Arc<dyn KeyValue>,
    events: Arc<dyn EventSink>,
    clock: C,
    config: QueueConfig,
    seq: AtomicU64,
    /// Receive is serialized per queue; enqueue/ack/extend touch disjoint
    /// keys and stay lock-free.
    receive_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Stored representation: the message plus its dequeue priority.
#[derive(serde::Serialize, serde::Deserialize)]
struct StoredMessage {
    #[serde(flatten)]
    message: QueueMessage,
    #[serde(default)]
    priority: i32,
}

impl<C: Clock> Queue<C> {
    pub fn new(kv: Arc<dyn KeyValue>, events: Arc<dyn EventSink>, clock: C, config: QueueConfig) -> Self {
        Self {
            kv,
            events,
            clock,
            config,
            seq: AtomicU64::new(0),
            receive_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn queue_lock(&self, queue_name: &str) -> Arc<Mutex<()>> {
        self.receive_locks
            .lock()
            .entry(queue_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Enqueue a job on the queue named after its type.
    pub fn enqueue(&self, job: QueueJob, opts: EnqueueOptions) -> Result<MessageId, StorageError> {
        let now = self.clock.epoch_ms();
        let queue_name = job.job_type.clone();
        let priority = opts.priority.unwrap_or(job.priority);

        let mut message = QueueMessage::new(&queue_name, now, job);
        if let Some(delay) = opts.visible_after {
            message.visible_at_ms = now + delay.as_millis() as u64;
        }
        let message_id = message.message_id;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let key = keys::queue_msg(&queue_name, now, seq);
        let stored = StoredMessage { message, priority };

        self.kv.write_batch(vec![
            BatchOp::put(&key, serde_json::to_vec(&stored)?),
            BatchOp::put(keys::msg_index(&message_id), key.clone().into_bytes()),
        ])?;

        tracing::debug!(queue = %queue_name, message_id = %message_id, "message enqueued");
        Ok(message_id)
    }

    /// Claim up to `max_batch` visible messages.
    ///
    /// Returns an empty batch rather than blocking; callers poll with
    /// backoff. Claimed messages get `visible_at = now + visibility_timeout`
    /// and an incremented `receive_count`; messages past the redelivery
    /// limit move to the dead-letter prefix instead of being returned.
    pub fn receive(
        &self,
        queue_name: &str,
        max_batch: usize,
    ) -> Result<Vec<QueueMessage>, StorageError> {
        let lock = self.queue_lock(queue_name);
        let _guard = lock.lock();

        let now = self.clock.epoch_ms();
        let mut candidates: Vec<(String, StoredMessage)> = Vec::new();
        for (key, bytes) in self.kv.scan_prefix(&keys::queue_prefix(queue_name))? {
            let stored: StoredMessage = serde_json::from_slice(&bytes)?;
            if stored.message.is_visible(now) {
                candidates.push((key, stored));
            }
        }
        // Higher priority first; FIFO key order within a priority.
        candidates.sort_by(|(ka, a), (kb, b)| b.priority.cmp(&a.priority).then(ka.cmp(kb)));

        let mut batch = Vec::new();
        let mut ops = Vec::new();
        for (key, mut stored) in candidates {
            if batch.len() >= max_batch {
                break;
            }
            stored.message.receive_count += 1;
            if stored.message.receive_count > self.config.max_receive {
                ops.push(BatchOp::delete(&key));
                ops.push(BatchOp::delete(keys::msg_index(&stored.message.message_id)));
                ops.push(BatchOp::put(
                    keys::dead(queue_name, &stored.message.job.id),
                    serde_json::to_vec(&stored)?,
                ));
                self.events.publish(Event::QueueItemDead {
                    queue_name: queue_name.to_string(),
                    message_id: stored.message.message_id,
                    job_id: stored.message.job.id,
                    receive_count: stored.message.receive_count,
                    error: CoreError::new(
                        ErrorKind::MaxRetriesExceeded,
                        format!("{} deliveries", stored.message.receive_count),
                    )
                    .with_job(stored.message.job.id),
                });
                continue;
            }
            stored.message.visible_at_ms = now + self.config.visibility_timeout.as_millis() as u64;
            ops.push(BatchOp::put(&key, serde_json::to_vec(&stored)?));
            batch.push(stored.message);
        }
        if !ops.is_empty() {
            self.kv.write_batch(ops)?;
        }
        Ok(batch)
    }

    fn locate(&self, message_id: &MessageId) -> Result<(String, StoredMessage), StorageError> {
        let key_bytes = self
            .kv
            .get(&keys::msg_index(message_id))?
            .ok_or_else(|| StorageError::not_found(format!("message {message_id}")))?;
        let key = String::from_utf8_lossy(&key_bytes).into_owned();
        let bytes = self
            .kv
            .get(&key)?
            .ok_or_else(|| StorageError::not_found(format!("message {message_id}")))?;
        Ok((key, serde_json::from_slice(&bytes)?))
    }

    /// Push the visibility horizon out for a long-running handler.
    pub fn extend(&self, message_id: &MessageId, duration: Duration) -> Result<(), StorageError> {
        let (key, mut stored) = self.locate(message_id)?;
        stored.message.visible_at_ms = self.clock.epoch_ms() + duration.as_millis() as u64;
        self.kv.put(&key, serde_json::to_vec(&stored)?)
    }

    /// Successful completion: delete the message.
    pub fn ack(&self, message_id: &MessageId) -> Result<(), StorageError> {
        let (key, _) = self.locate(message_id)?;
        self.kv.write_batch(vec![
            BatchOp::delete(key),
            BatchOp::delete(keys::msg_index(message_id)),
        ])
    }

    /// Failed attempt: make the message deliverable again, optionally after
    /// a delay.
    pub fn nack(
        &self,
        message_id: &MessageId,
        requeue_after: Option<Duration>,
    ) -> Result<(), StorageError> {
        let (key, mut stored) = self.locate(message_id)?;
        let delay = requeue_after.map(|d| d.as_millis() as u64).unwrap_or(0);
        stored.message.visible_at_ms = self.clock.epoch_ms() + delay;
        self.kv.put(&key, serde_json::to_vec(&stored)?)
    }

    /// Move a message to the dead-letter prefix and publish the fact.
    pub fn dead_letter(&self, message_id: &MessageId, error: CoreError) -> Result<(), StorageError> {
        let (key, stored) = self.locate(message_id)?;
        let queue_name = stored.message.queue_name.clone();
        self.kv.write_batch(vec![
            BatchOp::delete(key),
            BatchOp::delete(keys::msg_index(message_id)),
            BatchOp::put(
                keys::dead(&queue_name, &stored.message.job.id),
                serde_json::to_vec(&stored)?,
            ),
        ])?;
        self.events.publish(Event::QueueItemDead {
            queue_name,
            message_id: *message_id,
            job_id: stored.message.job.id,
            receive_count: stored.message.receive_count,
            error,
        });
        Ok(())
    }

    pub fn is_dead_lettered(&self, queue_name: &str, job_id: &JobId) -> Result<bool, StorageError> {
        Ok(self.kv.get(&keys::dead(queue_name, job_id))?.is_some())
    }

    pub fn stats(&self, queue_name: &str) -> Result<QueueStats, StorageError> {
        let now = self.clock.epoch_ms();
        let mut stats = QueueStats::default();
        for (_, bytes) in self.kv.scan_prefix(&keys::queue_prefix(queue_name))? {
            let stored: StoredMessage = serde_json::from_slice(&bytes)?;
            if stored.message.is_visible(now) {
                stats.pending += 1;
            } else {
                stats.in_flight += 1;
            }
        }
        stats.dead_letter = self.kv.scan_prefix(&keys::dead_prefix(queue_name))?.len();
        Ok(stats)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
