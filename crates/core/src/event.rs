// SPDX-License-Identifier: MIT

//! Event types carried by the in-process event bus.

use crate::error::CoreError;
use crate::id::{JobId, MessageId};
use crate::job::{ChildStats, JobStatus, Progress, QueueJob};
use crate::log::JobLogEntry;
use serde::{Deserialize, Serialize};

/// Events published on the bus and consumed by in-process subscribers
/// (WebSocket fan-out, log sinks, the parent-job monitor).
///
/// Serializes with `{"type": "event:name", ...fields}` format.
/// Unknown type tags deserialize to `Custom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "job:created")]
    JobCreated { job: QueueJob },

    #[serde(rename = "job:status_change")]
    JobStatusChange {
        job_id: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<JobId>,
        from: JobStatus,
        to: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CoreError>,
    },

    /// Mirror of `job:status_change` for children, keyed by parent so the
    /// parent-job monitor can filter without inspecting every job event.
    #[serde(rename = "child:status_change")]
    ChildStatusChange {
        job_id: JobId,
        parent_id: JobId,
        from: JobStatus,
        to: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CoreError>,
    },

    #[serde(rename = "job:progress")]
    JobProgress {
        job_id: JobId,
        progress: Progress,
        stats: ChildStats,
    },

    /// A worker produced one artifact.
    #[serde(rename = "document:saved")]
    DocumentSaved {
        job_id: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<JobId>,
        document_id: String,
    },

    /// A job log entry re-published by the log consumer. Non-loggable: the
    /// bus must never emit its own log line for this type (see
    /// [`EventKind::is_loggable`]).
    #[serde(rename = "log:event")]
    LogEvent { entry: JobLogEntry },

    /// A message exhausted its redelivery budget and moved to the dead-letter
    /// prefix.
    #[serde(rename = "queue:item_dead")]
    QueueItemDead {
        queue_name: String,
        message_id: MessageId,
        job_id: JobId,
        receive_count: u32,
        error: CoreError,
    },

    /// Catch-all for unknown event types (extensibility)
    #[serde(other, skip_serializing)]
    Custom,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        EventKind::of(self)
    }

    /// The job this event correlates to, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Event::JobCreated { job } => Some(job.id),
            Event::JobStatusChange { job_id, .. }
            | Event::ChildStatusChange { job_id, .. }
            | Event::JobProgress { job_id, .. }
            | Event::DocumentSaved { job_id, .. }
            | Event::QueueItemDead { job_id, .. } => Some(*job_id),
            Event::LogEvent { entry } => Some(entry.job_id),
            Event::Custom => None,
        }
    }

    /// The parent the event is scoped to, if any.
    pub fn parent_id(&self) -> Option<JobId> {
        match self {
            Event::JobCreated { job } => job.parent_id,
            Event::JobStatusChange { parent_id, .. } => *parent_id,
            Event::ChildStatusChange { parent_id, .. } => Some(*parent_id),
            Event::DocumentSaved { parent_id, .. } => *parent_id,
            _ => None,
        }
    }
}

/// Tag-only discriminant for [`Event`], used for subscription routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobCreated,
    JobStatusChange,
    ChildStatusChange,
    JobProgress,
    DocumentSaved,
    LogEvent,
    QueueItemDead,
    Custom,
}

crate::simple_display! {
    EventKind {
        JobCreated => "job:created",
        JobStatusChange => "job:status_change",
        ChildStatusChange => "child:status_change",
        JobProgress => "job:progress",
        DocumentSaved => "document:saved",
        LogEvent => "log:event",
        QueueItemDead => "queue:item_dead",
        Custom => "custom",
    }
}

impl EventKind {
    pub fn of(event: &Event) -> Self {
        match event {
            Event::JobCreated { .. } => EventKind::JobCreated,
            Event::JobStatusChange { .. } => EventKind::JobStatusChange,
            Event::ChildStatusChange { .. } => EventKind::ChildStatusChange,
            Event::JobProgress { .. } => EventKind::JobProgress,
            Event::DocumentSaved { .. } => EventKind::DocumentSaved,
            Event::LogEvent { .. } => EventKind::LogEvent,
            Event::QueueItemDead { .. } => EventKind::QueueItemDead,
            Event::Custom => EventKind::Custom,
        }
    }

    /// Whether a publication of this kind may itself be logged.
    ///
    /// `log:event` publications must stay silent: the log consumer turns log
    /// lines into `log:event` publications, so a bus-side log line for them
    /// would feed the cycle.
    pub fn is_loggable(self) -> bool {
        !matches!(self, EventKind::LogEvent)
    }
}

/// Sink for publishing events without a dependency on the bus itself.
///
/// Storage-layer components (queue, job store) publish through this seam;
/// the engine's event bus is the production implementation.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Sink that drops every event. For tests and standalone storage use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: Event) {}
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
