// SPDX-License-Identifier: MIT

//! Persisted job definitions, reconciled with the TOML directory.

use crate::error::StorageError;
use crate::keys;
use crate::kv::{BatchOp, KeyValue};
use parking_lot::RwLock;
use quaero_definition::{load_dir, JobDefinition};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Definitions load from a directory at startup and persist under
/// `jobdefs/{id}`; the on-disk TOML wins on reload so edits take effect
/// without touching the store by hand.
pub struct DefinitionStore {
    kv: Arc<dyn KeyValue>,
    dir: Option<PathBuf>,
    cache: RwLock<HashMap<String, JobDefinition>>,
}

impl DefinitionStore {
    pub fn new(kv: Arc<dyn KeyValue>, dir: Option<PathBuf>) -> Self {
        Self { kv, dir, cache: RwLock::new(HashMap::new()) }
    }

    /// Load definitions: persisted ones first, then the directory overlaid
    /// on top. Returns the number of definitions available.
    pub fn load(&self) -> Result<usize, StorageError> {
        let mut loaded: HashMap<String, JobDefinition> = HashMap::new();
        for (_, bytes) in self.kv.scan_prefix(keys::JOB_DEFS_PREFIX)? {
            let def: JobDefinition = serde_json::from_slice(&bytes)?;
            loaded.insert(def.id.clone(), def);
        }

        if let Some(dir) = &self.dir {
            let from_disk = load_dir(dir)
                .map_err(|e| StorageError::io(format!("definition directory: {e}")))?;
            let mut ops = Vec::with_capacity(from_disk.len());
            for def in from_disk {
                ops.push(BatchOp::put(keys::job_def(&def.id), serde_json::to_vec(&def)?));
                loaded.insert(def.id.clone(), def);
            }
            if !ops.is_empty() {
                self.kv.write_batch(ops)?;
            }
        }

        let count = loaded.len();
        *self.cache.write() = loaded;
        tracing::info!(count, "job definitions loaded");
        Ok(count)
    }

    /// Re-read the directory; the reload hook for definition edits.
    pub fn reload(&self) -> Result<usize, StorageError> {
        self.load()
    }

    pub fn get(&self, id: &str) -> Option<JobDefinition> {
        self.cache.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<JobDefinition> {
        let mut defs: Vec<JobDefinition> = self.cache.read().values().cloned().collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    /// Insert a definition directly (tests and programmatic registration at
    /// startup; runtime registration is out of scope).
    pub fn put(&self, def: JobDefinition) -> Result<(), StorageError> {
        self.kv.put(&keys::job_def(&def.id), serde_json::to_vec(&def)?)?;
        self.cache.write().insert(def.id.clone(), def);
        Ok(())
    }
}

#[cfg(test)]
#[path = "definitions_tests.rs"]
mod tests;
