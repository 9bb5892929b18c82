// SPDX-License-Identifier: MIT

//! Worker for `database_maintenance_operation` jobs.
//!
//! Operations run against the KV store itself:
//! - `VACUUM` drops index entries whose referent is gone (children index
//!   entries of deleted jobs, message-index entries of acked messages).
//! - `ANALYZE` counts keys per top-level prefix and records the counts in
//!   the job log.
//! - `REINDEX` rebuilds the children index from the job records.

use crate::managers::MAINTENANCE_OPERATIONS;
use crate::worker::{Worker, WorkerContext};
use quaero_core::{CoreError, ErrorKind, JobId, LogLevel, QueueJob};
use quaero_storage::{keys, BatchOp, KeyValue};
use serde_json::json;
use std::sync::Arc;

pub struct MaintenanceWorker {
    kv: Arc<dyn KeyValue>,
}

impl MaintenanceWorker {
    pub fn new(kv: Arc<dyn KeyValue>) -> Self {
        Self { kv }
    }

    fn vacuum(&self) -> Result<usize, CoreError> {
        let mut ops = Vec::new();
        for (key, id_bytes) in self.scan("children/")? {
            let child = format!("jobs/{}", String::from_utf8_lossy(&id_bytes));
            if self.get(&child)?.is_none() {
                ops.push(BatchOp::delete(key));
            }
        }
        for (key, target) in self.scan("msgidx/")? {
            let queue_key = String::from_utf8_lossy(&target).into_owned();
            if self.get(&queue_key)?.is_none() {
                ops.push(BatchOp::delete(key));
            }
        }
        let removed = ops.len();
        if removed > 0 {
            self.kv.write_batch(ops).map_err(storage_err)?;
        }
        Ok(removed)
    }

    fn analyze(&self, ctx: &WorkerContext, job_id: JobId) -> Result<usize, CoreError> {
        let mut total = 0;
        for prefix in ["jobs/", "jobmeta/", "joblog/", "queue/", "dead/", "children/", "jobdefs/"] {
            let count = self.scan(prefix)?.len();
            total += count;
            ctx.logger.with_fields(
                job_id,
                LogLevel::Info,
                format!("{prefix} holds {count} keys"),
                vec![("prefix", json!(prefix)), ("keys", json!(count))],
            );
        }
        Ok(total)
    }

    fn reindex(&self) -> Result<usize, CoreError> {
        let mut ops = Vec::new();
        for (_, bytes) in self.scan("jobs/")? {
            let job: QueueJob = serde_json::from_slice(&bytes)
                .map_err(|e| CoreError::new(ErrorKind::Storage, e.to_string()))?;
            if let Some(parent_id) = &job.parent_id {
                let key = keys::child(parent_id, job.created_at_ms, &job.id);
                if self.get(&key)?.is_none() {
                    ops.push(BatchOp::put(key, job.id.as_str().as_bytes().to_vec()));
                }
            }
        }
        let restored = ops.len();
        if restored > 0 {
            self.kv.write_batch(ops).map_err(storage_err)?;
        }
        Ok(restored)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, CoreError> {
        self.kv.scan_prefix(prefix).map_err(storage_err)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        self.kv.get(key).map_err(storage_err)
    }
}

fn storage_err(e: quaero_storage::StorageError) -> CoreError {
    CoreError::new(e.kind(), e.to_string())
}

#[async_trait::async_trait]
impl Worker for MaintenanceWorker {
    fn job_type(&self) -> &'static str {
        "database_maintenance_operation"
    }

    fn validate(&self, job: &QueueJob) -> Result<(), CoreError> {
        match job.config_str("operation") {
            Some(op) if MAINTENANCE_OPERATIONS.contains(&op) => Ok(()),
            Some(other) => Err(CoreError::new(
                ErrorKind::InvalidConfig,
                format!("unknown maintenance operation {other:?}"),
            )),
            None => Err(CoreError::new(ErrorKind::InvalidConfig, "missing operation")),
        }
    }

    async fn execute(&self, ctx: &WorkerContext, job: &QueueJob) -> Result<(), CoreError> {
        if ctx.cancel.is_cancelled() {
            return Err(CoreError::new(ErrorKind::Cancelled, "cancelled"));
        }
        // validate() runs first, so the operation is known here.
        let touched = match job.config_str("operation") {
            Some("VACUUM") => self.vacuum()?,
            Some("ANALYZE") => self.analyze(ctx, job.id)?,
            Some("REINDEX") => self.reindex()?,
            other => {
                return Err(CoreError::new(
                    ErrorKind::InvalidConfig,
                    format!("unknown maintenance operation {other:?}"),
                ))
            }
        };
        ctx.logger.info(job.id, format!("maintenance touched {touched} keys"));
        Ok(())
    }
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
