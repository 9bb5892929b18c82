// SPDX-License-Identifier: MIT

//! Ordered key/value abstraction over the embedded store.
//!
//! The concrete on-disk engine lives behind [`KeyValue`]; the core only
//! requires ordered prefix iteration, atomic multi-key batches, and a
//! single-key compare-and-swap. Operations are linearizable per key.

use crate::error::StorageError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// One operation in an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl BatchOp {
    pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
        BatchOp::Put { key: key.into(), value }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        BatchOp::Delete { key: key.into() }
    }
}

/// Ordered key/value store contract.
pub trait KeyValue: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    /// Apply every operation or none.
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError>;

    /// Atomically replace `key` iff its current value matches `expected`
    /// (`None` = key absent). `value = None` deletes. Returns false on
    /// mismatch without modifying anything.
    fn compare_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Option<Vec<u8>>,
    ) -> Result<bool, StorageError>;
}

/// In-memory [`KeyValue`] backed by a `BTreeMap`.
///
/// The development and test backend; key order matches what an LSM/B-tree
/// engine provides on disk.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl KeyValue for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.inner.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let guard = self.inner.read();
        let range = guard
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(range)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let mut guard = self.inner.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    guard.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    guard.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn compare_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Option<Vec<u8>>,
    ) -> Result<bool, StorageError> {
        let mut guard = self.inner.write();
        let current = guard.get(key).map(|v| v.as_slice());
        if current != expected {
            return Ok(false);
        }
        match value {
            Some(v) => {
                guard.insert(key.to_string(), v);
            }
            None => {
                guard.remove(key);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
#[path = "kv_tests.rs"]
mod tests;
