// SPDX-License-Identifier: MIT

//! Job log persistence and cursor-paginated queries.

use crate::error::StorageError;
use crate::jobs::JobStore;
use crate::keys;
use quaero_core::{Clock, JobId, JobLogEntry, LogLevel};
use serde_json::{Map, Value};
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOrder {
    #[default]
    Asc,
    Desc,
}

/// Query parameters for a log page.
#[derive(Debug, Clone)]
pub struct LogQuery {
    /// Opaque cursor from a previous page; `None` starts at the edge.
    pub cursor: Option<String>,
    pub limit: usize,
    /// `None` means `all`.
    pub level: Option<LogLevel>,
    pub order: LogOrder,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self { cursor: None, limit: 100, level: None, order: LogOrder::Asc }
    }
}

#[derive(Debug, Clone)]
pub struct LogPage {
    pub entries: Vec<JobLogEntry>,
    pub next_cursor: Option<String>,
}

/// A log page plus the job's metadata enrichment (empty when enrichment
/// fails; the page itself still succeeds).
#[derive(Debug, Clone)]
pub struct AggregatedLogs {
    pub entries: Vec<JobLogEntry>,
    pub next_cursor: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Sort/cursor key: timestamp then sequence then job id, so entries from
/// different jobs interleave deterministically.
fn entry_cursor(entry: &JobLogEntry) -> String {
    format!("{:020}-{:06}-{}", entry.ts_ms, entry.seq, entry.job_id)
}

impl<C: Clock> JobStore<C> {
    /// Append one entry. A zero `seq` is assigned from the store's counter.
    pub fn append_log(&self, mut entry: JobLogEntry) -> Result<(), StorageError> {
        if entry.seq == 0 {
            entry.seq = self.log_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        }
        if entry.ts_ms == 0 {
            entry.ts_ms = self.clock().epoch_ms();
        }
        let key = keys::job_log(&entry.job_id, entry.ts_ms, entry.seq);
        self.kv().put(&key, serde_json::to_vec(&entry)?)
    }

    fn collect_logs(&self, job_id: &JobId) -> Result<Vec<JobLogEntry>, StorageError> {
        self.kv()
            .scan_prefix(&keys::job_log_prefix(job_id))?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(StorageError::from))
            .collect()
    }

    /// One page of a single job's log. Fails `NotFound` for a missing job.
    pub fn get_logs(&self, job_id: &JobId, query: &LogQuery) -> Result<LogPage, StorageError> {
        if !self.exists(job_id)? {
            return Err(StorageError::not_found(format!("job {job_id}")));
        }
        let entries = self.collect_logs(job_id)?;
        Ok(paginate(entries, query))
    }

    /// Aggregated logs for a job, optionally merged with its children's
    /// entries by timestamp.
    ///
    /// A missing job id is a hard `NotFound`. A job whose metadata record
    /// fails to load still returns its logs, with empty metadata and a
    /// warn-level trace.
    pub fn aggregated_logs(
        &self,
        job_id: &JobId,
        include_children: bool,
        query: &LogQuery,
    ) -> Result<AggregatedLogs, StorageError> {
        if !self.exists(job_id)? {
            return Err(StorageError::not_found(format!("job {job_id}")));
        }

        let mut entries = self.collect_logs(job_id)?;
        if include_children {
            for child in self.list_children(job_id)? {
                entries.extend(self.collect_logs(&child.id)?);
            }
        }
        let page = paginate(entries, query);

        let metadata = match self.read_meta(job_id) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "metadata enrichment failed, degrading to empty");
                Map::new()
            }
        };

        Ok(AggregatedLogs { entries: page.entries, next_cursor: page.next_cursor, metadata })
    }
}

fn paginate(mut entries: Vec<JobLogEntry>, query: &LogQuery) -> LogPage {
    entries.retain(|e| e.level.passes(query.level));
    entries.sort_by_key(entry_cursor);
    if query.order == LogOrder::Desc {
        entries.reverse();
    }
    if let Some(cursor) = &query.cursor {
        let past_cursor = |e: &JobLogEntry| match query.order {
            LogOrder::Asc => entry_cursor(e) > *cursor,
            LogOrder::Desc => entry_cursor(e) < *cursor,
        };
        entries.retain(past_cursor);
    }
    let has_more = entries.len() > query.limit;
    entries.truncate(query.limit);
    let next_cursor = if has_more { entries.last().map(entry_cursor) } else { None };
    LogPage { entries, next_cursor }
}

#[cfg(test)]
#[path = "logs_tests.rs"]
mod tests;
