// SPDX-License-Identifier: MIT

//! Job store: CRUD over [`QueueJob`] records and the derived
//! [`QueueJobState`] view.
//!
//! Status changes are written twice on purpose: once as an append-only
//! `status`-level log entry (history) and once into the compact metadata
//! slot (O(1) current-state reads). `state_of` prefers the slot and falls
//! back to the log tail.

use crate::error::StorageError;
use crate::keys;
use crate::kv::{BatchOp, KeyValue};
use quaero_core::job::meta;
use quaero_core::{
    Clock, CoreError, ErrorKind, Event, EventSink, JobId, JobLogEntry, JobStatus, LogLevel,
    Progress, QueueJob, QueueJobState,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

/// Bounded retry for the metadata read-modify-write loop.
const MAX_PATCH_ATTEMPTS: u32 = 5;

pub struct JobStore<C: Clock> {
    kv: Arc<dyn KeyValue>,
    events: Arc<dyn EventSink>,
    clock: C,
    /// Tie-breaker for log entries sharing a millisecond.
    pub(crate) log_seq: AtomicU32,
}

impl<C: Clock> JobStore<C> {
    pub fn new(kv: Arc<dyn KeyValue>, events: Arc<dyn EventSink>, clock: C) -> Self {
        Self { kv, events, clock, log_seq: AtomicU32::new(0) }
    }

    pub(crate) fn kv(&self) -> &Arc<dyn KeyValue> {
        &self.kv
    }

    pub(crate) fn clock(&self) -> &C {
        &self.clock
    }

    /// Persist a job record (and its parent-index entry), then publish
    /// `job:created`. The record is immutable once saved; re-saving the same
    /// id is a no-op overwrite that preserves accumulated metadata.
    pub fn save(&self, job: &QueueJob) -> Result<(), StorageError> {
        if let Some(parent_id) = &job.parent_id {
            if self.kv.get(&keys::job(parent_id))?.is_none() {
                return Err(StorageError::not_found(format!(
                    "parent {parent_id} of job {}",
                    job.id
                )));
            }
        }

        let mut ops = vec![BatchOp::put(keys::job(&job.id), serde_json::to_vec(job)?)];
        if self.kv.get(&keys::job_meta(&job.id))?.is_none() {
            let mut meta_map = Map::new();
            meta_map.insert(meta::STATUS.into(), json!(JobStatus::Pending.to_string()));
            ops.push(BatchOp::put(keys::job_meta(&job.id), serde_json::to_vec(&meta_map)?));
        }
        if let Some(parent_id) = &job.parent_id {
            ops.push(BatchOp::put(
                keys::child(parent_id, job.created_at_ms, &job.id),
                job.id.as_str().as_bytes().to_vec(),
            ));
        }
        self.kv.write_batch(ops)?;

        self.events.publish(Event::JobCreated { job: job.clone() });
        Ok(())
    }

    /// Persist a parent record, enforcing the canonical parent type tag the
    /// monitor validates against.
    pub fn create_parent(&self, job: &QueueJob) -> Result<(), StorageError> {
        if !job.is_parent() {
            return Err(StorageError::Core(
                CoreError::new(
                    ErrorKind::InvalidJobType,
                    format!("parent record has type {:?}", job.job_type),
                )
                .with_job(job.id),
            ));
        }
        self.save(job)
    }

    pub fn get(&self, id: &JobId) -> Result<QueueJob, StorageError> {
        match self.kv.get(&keys::job(id))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(StorageError::not_found(format!("job {id}"))),
        }
    }

    pub fn exists(&self, id: &JobId) -> Result<bool, StorageError> {
        Ok(self.kv.get(&keys::job(id))?.is_some())
    }

    pub(crate) fn read_meta(&self, id: &JobId) -> Result<Map<String, Value>, StorageError> {
        match self.kv.get(&keys::job_meta(id))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Map::new()),
        }
    }

    /// Rebuild the execution view from the record, the metadata slot, and
    /// (when the slot carries no status) the log tail.
    pub fn state_of(&self, id: &JobId) -> Result<QueueJobState, StorageError> {
        let job = self.get(id)?;
        let meta_map = self.read_meta(id)?;
        Ok(self.assemble_state(job, meta_map))
    }

    fn assemble_state(&self, job: QueueJob, meta_map: Map<String, Value>) -> QueueJobState {
        let status = meta_map
            .get(meta::STATUS)
            .and_then(|v| v.as_str())
            .and_then(JobStatus::parse)
            .or_else(|| self.status_from_log_tail(&job.id))
            .unwrap_or(JobStatus::Pending);
        let started_at_ms = meta_map.get(meta::STARTED_AT_MS).and_then(Value::as_u64);
        let finished_at_ms = meta_map.get(meta::FINISHED_AT_MS).and_then(Value::as_u64);
        let last_error = meta_map
            .get(meta::LAST_ERROR)
            .and_then(|v| serde_json::from_value::<CoreError>(v.clone()).ok());
        let progress = meta_map
            .get(meta::PROGRESS)
            .and_then(|v| serde_json::from_value::<Progress>(v.clone()).ok())
            .unwrap_or_default();

        QueueJobState {
            queue_job: job,
            status,
            started_at_ms,
            finished_at_ms,
            last_error,
            progress,
            metadata: meta_map,
        }
    }

    /// Log-tail reconstruction: the newest `status`-level entry wins.
    fn status_from_log_tail(&self, id: &JobId) -> Option<JobStatus> {
        let entries = self.kv.scan_prefix(&keys::job_log_prefix(id)).ok()?;
        entries.iter().rev().find_map(|(_, bytes)| {
            let entry: JobLogEntry = serde_json::from_slice(bytes).ok()?;
            if entry.level != LogLevel::Status {
                return None;
            }
            entry.fields.get("status").and_then(|v| v.as_str()).and_then(JobStatus::parse)
        })
    }

    /// Atomic read-modify-write of the metadata slot. Caller-provided keys
    /// overwrite; missing keys are preserved.
    pub fn patch_metadata(
        &self,
        id: &JobId,
        patch: &Map<String, Value>,
    ) -> Result<QueueJobState, StorageError> {
        let job = self.get(id)?;
        let key = keys::job_meta(id);
        for _ in 0..MAX_PATCH_ATTEMPTS {
            let current = self.kv.get(&key)?;
            let mut merged: Map<String, Value> = match &current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => Map::new(),
            };
            for (k, v) in patch {
                merged.insert(k.clone(), v.clone());
            }
            let bytes = serde_json::to_vec(&merged)?;
            if self.kv.compare_swap(&key, current.as_deref(), Some(bytes))? {
                return Ok(self.assemble_state(job, merged));
            }
        }
        Err(StorageError::PatchConflict(*id, MAX_PATCH_ATTEMPTS))
    }

    /// Merge keys into the job's `config`. Only sound before children are
    /// spawned from the config; the record is otherwise frozen.
    pub fn patch_config(
        &self,
        id: &JobId,
        patch: &Map<String, Value>,
    ) -> Result<QueueJob, StorageError> {
        let key = keys::job(id);
        for _ in 0..MAX_PATCH_ATTEMPTS {
            let current = self
                .kv
                .get(&key)?
                .ok_or_else(|| StorageError::not_found(format!("job {id}")))?;
            let mut job: QueueJob = serde_json::from_slice(&current)?;
            for (k, v) in patch {
                job.config.insert(k.clone(), v.clone());
            }
            let bytes = serde_json::to_vec(&job)?;
            if self.kv.compare_swap(&key, Some(current.as_slice()), Some(bytes))? {
                return Ok(job);
            }
        }
        Err(StorageError::PatchConflict(*id, MAX_PATCH_ATTEMPTS))
    }

    /// Children of a parent, ordered by creation time.
    pub fn list_children(&self, parent_id: &JobId) -> Result<Vec<QueueJob>, StorageError> {
        let mut children = Vec::new();
        for (_, id_bytes) in self.kv.scan_prefix(&keys::children_prefix(parent_id))? {
            let id = JobId::from_string(String::from_utf8_lossy(&id_bytes));
            match self.get(&id) {
                Ok(job) => children.push(job),
                // Index entry outliving a deleted child is not fatal.
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(children)
    }

    pub fn child_states(&self, parent_id: &JobId) -> Result<Vec<QueueJobState>, StorageError> {
        self.list_children(parent_id)?
            .into_iter()
            .map(|job| {
                let meta_map = self.read_meta(&job.id)?;
                Ok(self.assemble_state(job, meta_map))
            })
            .collect()
    }

    /// All jobs currently in `status`, up to `limit`.
    pub fn list_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<QueueJobState>, StorageError> {
        let mut out = Vec::new();
        for (_, bytes) in self.kv.scan_prefix(keys::JOBS_PREFIX)? {
            let job: QueueJob = serde_json::from_slice(&bytes)?;
            let meta_map = self.read_meta(&job.id)?;
            let state = self.assemble_state(job, meta_map);
            if state.status == status {
                out.push(state);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    pub fn list_states(&self, limit: usize) -> Result<Vec<QueueJobState>, StorageError> {
        let mut out = Vec::new();
        for (_, bytes) in self.kv.scan_prefix(keys::JOBS_PREFIX)? {
            let job: QueueJob = serde_json::from_slice(&bytes)?;
            let meta_map = self.read_meta(&job.id)?;
            out.push(self.assemble_state(job, meta_map));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Validated status transition with the dual write and event publication.
    ///
    /// Re-asserting the current status is an idempotent no-op (redelivered
    /// messages hit this). An illegal transition fails without mutating.
    pub fn update_status(
        &self,
        id: &JobId,
        new_status: JobStatus,
        error: Option<CoreError>,
    ) -> Result<QueueJobState, StorageError> {
        let state = self.state_of(id)?;
        let from = state.status;
        if from == new_status {
            return Ok(state);
        }
        if !from.can_transition_to(new_status) {
            tracing::error!(job_id = %id, %from, to = %new_status, "invalid status transition");
            return Err(StorageError::InvalidTransition { job_id: *id, from, to: new_status });
        }

        let now = self.clock.epoch_ms();
        let mut patch = Map::new();
        patch.insert(meta::STATUS.into(), json!(new_status.to_string()));
        patch.insert(meta::HEARTBEAT_MS.into(), json!(now));
        if new_status == JobStatus::Running && state.started_at_ms.is_none() {
            patch.insert(meta::STARTED_AT_MS.into(), json!(now));
        }
        if new_status.is_terminal() {
            patch.insert(meta::FINISHED_AT_MS.into(), json!(now));
        }
        if let Some(err) = &error {
            patch.insert(meta::LAST_ERROR.into(), serde_json::to_value(err)?);
        }
        let new_state = self.patch_metadata(id, &patch)?;

        let mut entry = JobLogEntry::new(*id, now, LogLevel::Status, format!("{from} -> {new_status}"))
            .with_field("status", json!(new_status.to_string()));
        if let Some(err) = &error {
            entry = entry.with_field("error", serde_json::to_value(err)?);
        }
        self.append_log(entry)?;

        self.events.publish(Event::JobStatusChange {
            job_id: *id,
            parent_id: state.queue_job.parent_id,
            from,
            to: new_status,
            error: error.clone(),
        });
        if let Some(parent_id) = state.queue_job.parent_id {
            self.events.publish(Event::ChildStatusChange {
                job_id: *id,
                parent_id,
                from,
                to: new_status,
                error,
            });
        }
        Ok(new_state)
    }

    /// Terminal transition; `finished_at` is stamped by `update_status`.
    pub fn set_finished(
        &self,
        id: &JobId,
        status: JobStatus,
        error: Option<CoreError>,
    ) -> Result<QueueJobState, StorageError> {
        if !status.is_terminal() {
            return Err(StorageError::Core(
                CoreError::new(
                    ErrorKind::InvalidTransition,
                    format!("set_finished requires a terminal status, got {status}"),
                )
                .with_job(*id),
            ));
        }
        self.update_status(id, status, error)
    }

    /// Atomic add into `metadata.document_count`.
    pub fn increment_document_count(&self, id: &JobId, delta: u64) -> Result<u64, StorageError> {
        if !self.exists(id)? {
            return Err(StorageError::not_found(format!("job {id}")));
        }
        let key = keys::job_meta(id);
        for _ in 0..MAX_PATCH_ATTEMPTS {
            let current = self.kv.get(&key)?;
            let mut merged: Map<String, Value> = match &current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => Map::new(),
            };
            let count = merged
                .get(meta::DOCUMENT_COUNT)
                .and_then(Value::as_u64)
                .unwrap_or(0)
                .saturating_add(delta);
            merged.insert(meta::DOCUMENT_COUNT.into(), json!(count));
            let bytes = serde_json::to_vec(&merged)?;
            if self.kv.compare_swap(&key, current.as_deref(), Some(bytes))? {
                return Ok(count);
            }
        }
        Err(StorageError::PatchConflict(*id, MAX_PATCH_ATTEMPTS))
    }

    /// Remove the record, its metadata, its logs, and its index entries.
    ///
    /// Children are separate jobs; callers delete them first (the engine's
    /// delete path does, after cancelling).
    pub fn delete(&self, id: &JobId) -> Result<(), StorageError> {
        let job = self.get(id)?;
        let mut ops = vec![
            BatchOp::delete(keys::job(id)),
            BatchOp::delete(keys::job_meta(id)),
        ];
        for (k, _) in self.kv.scan_prefix(&keys::job_log_prefix(id))? {
            ops.push(BatchOp::delete(k));
        }
        if let Some(parent_id) = &job.parent_id {
            for (k, v) in self.kv.scan_prefix(&keys::children_prefix(parent_id))? {
                if v == id.as_str().as_bytes() {
                    ops.push(BatchOp::delete(k));
                }
            }
        }
        for (k, _) in self.kv.scan_prefix(&keys::children_prefix(id))? {
            ops.push(BatchOp::delete(k));
        }
        self.kv.write_batch(ops)
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
