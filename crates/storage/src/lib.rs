// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! quaero-storage: persistence for jobs, job logs, the message queue, and
//! job definitions, over an abstracted ordered key/value store.

pub mod definitions;
pub mod error;
pub mod jobs;
pub mod keys;
pub mod kv;
pub mod logs;
pub mod queue;

pub use definitions::DefinitionStore;
pub use error::StorageError;
pub use jobs::JobStore;
pub use kv::{BatchOp, KeyValue, MemoryStore};
pub use logs::{AggregatedLogs, LogOrder, LogPage, LogQuery};
pub use queue::{EnqueueOptions, Queue, QueueConfig, QueueStats};
