// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! quaero-core: data model for the Quaero job execution engine

pub mod macros;

pub mod clock;
pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod log;
pub mod message;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{CoreError, ErrorKind};
pub use event::{Event, EventKind, EventSink, NullSink};
pub use id::{short, JobId, MessageId, SubscriptionId};
#[cfg(any(test, feature = "test-support"))]
pub use job::QueueJobBuilder;
pub use job::{ChildStats, JobStatus, Progress, QueueJob, QueueJobState, PARENT_TYPE};
pub use log::{JobLogEntry, LogLevel};
pub use message::QueueMessage;
