// SPDX-License-Identifier: MIT

//! Job records, the status state machine, and derived execution views.

use crate::error::CoreError;
use crate::id::JobId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The single canonical `type` tag for parent job records.
///
/// Every manager MUST stamp parents with this exact value; the parent-job
/// monitor validates against it and fails the parent otherwise.
pub const PARENT_TYPE: &str = "parent";

/// Reserved keys in the mutable job metadata map.
pub mod meta {
    pub const STATUS: &str = "status";
    pub const STARTED_AT_MS: &str = "started_at_ms";
    pub const FINISHED_AT_MS: &str = "finished_at_ms";
    pub const LAST_ERROR: &str = "last_error";
    pub const PROGRESS: &str = "progress";
    pub const DOCUMENT_COUNT: &str = "document_count";
    pub const CANCEL_REQUESTED: &str = "cancel_requested";
    pub const DEFINITION_ID: &str = "definition_id";
    pub const TIMEOUT_MS: &str = "timeout_ms";
    pub const ERROR_TOLERANCE: &str = "error_tolerance";
    pub const HEARTBEAT_MS: &str = "heartbeat_ms";
}

/// Immutable record of work as enqueued.
///
/// Fields are frozen once the job is persisted; everything mutable lives in
/// the metadata map of [`QueueJobState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: JobId,
    /// Set for children; references an existing job of type [`PARENT_TYPE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    /// Job-type tag; routes the job to a worker (or marks it a parent).
    #[serde(rename = "type")]
    pub job_type: String,
    pub name: String,
    pub created_at_ms: u64,
    /// Opaque key→value configuration, validated by the owning manager.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub priority: i32,
}

impl QueueJob {
    pub fn is_parent(&self) -> bool {
        self.job_type == PARENT_TYPE
    }

    /// Fetch a string config value.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

crate::builder! {
    pub struct QueueJobBuilder => QueueJob {
        into {
            id: JobId = "job-test-1",
            job_type: String = "crawler_url",
            name: String = "test-job",
        }
        set {
            created_at_ms: u64 = 1_000_000,
            config: serde_json::Map<String, serde_json::Value> = serde_json::Map::new(),
            tags: BTreeSet<String> = BTreeSet::new(),
            priority: i32 = 0,
        }
        option {
            parent_id: JobId = None,
        }
    }
}

/// Execution status shared by parent and child jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Queued => "queued",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl JobStatus {
    /// Terminal states are latched: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `Running → Queued` is the redelivery edge: a nacked message returns
    /// its job to the queue for another attempt.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Running)
                | (Pending, Cancelled)
                | (Queued, Running)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Queued)
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// Aggregated progress published for parent jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: u64,
    /// Human-readable label for the unit currently in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
}

impl Progress {
    /// Completion ratio in `[0, 1]`; a zero total reads as zero progress.
    pub fn percent(&self) -> f64 {
        self.completed as f64 / self.total.max(1) as f64
    }
}

/// Derived execution view over a [`QueueJob`].
///
/// Never stored as a unit: rebuilt on demand from the immutable record, the
/// metadata slot, and (as a fallback) the job log tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJobState {
    pub queue_job: QueueJob,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<CoreError>,
    #[serde(default)]
    pub progress: Progress,
    /// Mutable patch map (document_count, per-action fields, …).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl From<QueueJob> for QueueJobState {
    fn from(queue_job: QueueJob) -> Self {
        Self {
            queue_job,
            status: JobStatus::Pending,
            started_at_ms: None,
            finished_at_ms: None,
            last_error: None,
            progress: Progress::default(),
            metadata: serde_json::Map::new(),
        }
    }
}

impl QueueJobState {
    pub fn job_id(&self) -> JobId {
        self.queue_job.id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when a cancel has been requested out-of-band via metadata.
    pub fn cancel_requested(&self) -> bool {
        self.metadata
            .get(meta::CANCEL_REQUESTED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn document_count(&self) -> u64 {
        self.metadata
            .get(meta::DOCUMENT_COUNT)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }
}

/// Per-parent aggregate computed from child states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildStats {
    pub total: u64,
    pub pending: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub document_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_start_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_finish_ms: Option<u64>,
}

impl ChildStats {
    /// Fold one child's state into the aggregate.
    pub fn record(&mut self, state: &QueueJobState) {
        self.total += 1;
        match state.status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Queued => self.queued += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
        self.document_count += state.document_count();
        if let Some(start) = state.started_at_ms {
            self.earliest_start_ms =
                Some(self.earliest_start_ms.map_or(start, |cur| cur.min(start)));
        }
        if let Some(finish) = state.finished_at_ms {
            self.latest_finish_ms =
                Some(self.latest_finish_ms.map_or(finish, |cur| cur.max(finish)));
        }
    }

    pub fn from_states<'a>(states: impl IntoIterator<Item = &'a QueueJobState>) -> Self {
        let mut stats = Self::default();
        for state in states {
            stats.record(state);
        }
        stats
    }

    /// All children have reached a terminal state (vacuously true when empty).
    pub fn all_terminal(&self) -> bool {
        self.pending + self.queued + self.running == 0
    }

    pub fn failed_percent(&self) -> f64 {
        self.failed as f64 * 100.0 / self.total.max(1) as f64
    }

    pub fn to_progress(&self) -> Progress {
        Progress {
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            in_flight: self.queued + self.running,
            current: None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
