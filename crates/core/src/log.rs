// SPDX-License-Identifier: MIT

//! Per-job structured log entries.

use crate::id::JobId;
use serde::{Deserialize, Serialize};

/// Log severity ladder, plus the `status` channel used for status-transition
/// entries (the durable half of the dual status write).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Status,
}

crate::simple_display! {
    LogLevel {
        Trace => "trace",
        Debug => "debug",
        Info => "info",
        Warn => "warn",
        Error => "error",
        Status => "status",
    }
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "status" => Some(LogLevel::Status),
            _ => None,
        }
    }

    /// Whether an entry at `self` passes a query filter.
    ///
    /// `status` is its own channel and only matches exactly; severity levels
    /// match at-or-above the requested floor. A `None` filter (`all`) passes
    /// everything.
    pub fn passes(self, filter: Option<LogLevel>) -> bool {
        match filter {
            None => true,
            Some(LogLevel::Status) => self == LogLevel::Status,
            Some(floor) => self != LogLevel::Status && self >= floor,
        }
    }
}

/// A single append-only job log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub job_id: JobId,
    pub ts_ms: u64,
    /// Disambiguates entries sharing a millisecond timestamp.
    #[serde(default)]
    pub seq: u32,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl JobLogEntry {
    pub fn new(job_id: JobId, ts_ms: u64, level: LogLevel, message: impl Into<String>) -> Self {
        Self { job_id, ts_ms, seq: 0, level, message: message.into(), fields: serde_json::Map::new() }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
