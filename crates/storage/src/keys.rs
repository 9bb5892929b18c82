// SPDX-License-Identifier: MIT

//! Key layout for the ordered store.
//!
//! Timestamps are zero-padded to 20 digits so lexicographic key order equals
//! numeric order; sequence numbers break ties within a millisecond.

use quaero_core::JobId;

pub const JOBS_PREFIX: &str = "jobs/";

pub fn job(id: &JobId) -> String {
    format!("jobs/{id}")
}

pub fn job_meta(id: &JobId) -> String {
    format!("jobmeta/{id}")
}

pub fn children_prefix(parent_id: &JobId) -> String {
    format!("children/{parent_id}/")
}

pub fn child(parent_id: &JobId, created_at_ms: u64, id: &JobId) -> String {
    format!("children/{parent_id}/{created_at_ms:020}-{id}")
}

pub fn job_log_prefix(id: &JobId) -> String {
    format!("joblog/{id}/")
}

pub fn job_log(id: &JobId, ts_ms: u64, seq: u32) -> String {
    format!("joblog/{id}/{ts_ms:020}-{seq:06}")
}

pub fn queue_prefix(queue_name: &str) -> String {
    format!("queue/{queue_name}/")
}

pub fn queue_msg(queue_name: &str, enqueued_at_ms: u64, seq: u64) -> String {
    format!("queue/{queue_name}/{enqueued_at_ms:020}-{seq:06}")
}

/// Index from message ID to its current queue key, maintained by the queue
/// so extend/ack/nack can address a message without a prefix scan.
pub fn msg_index(message_id: &quaero_core::MessageId) -> String {
    format!("msgidx/{message_id}")
}

pub fn dead_prefix(queue_name: &str) -> String {
    format!("dead/{queue_name}/")
}

pub fn dead(queue_name: &str, job_id: &JobId) -> String {
    format!("dead/{queue_name}/{job_id}")
}

pub fn job_def(id: &str) -> String {
    format!("jobdefs/{id}")
}

pub const JOB_DEFS_PREFIX: &str = "jobdefs/";
