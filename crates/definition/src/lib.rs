// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! quaero-definition: user-authored TOML job definitions.

pub mod cron;
pub mod def;
pub mod duration;
pub mod load;
pub mod tolerance;

pub use cron::CronExpr;
pub use def::{DefinitionError, JobDefinition, Step};
pub use duration::parse_duration;
pub use load::load_dir;
pub use tolerance::ErrorTolerance;
