// SPDX-License-Identifier: MIT

//! Built-in workers. Anything needing an external service (HTTP, LLM
//! providers, search APIs) stays behind an injected trait; only the
//! contract and the storage-backed maintenance worker live here.

pub mod crawler;
pub mod maintenance;

pub use crawler::{CrawlerUrlWorker, FetchedPage, Fetcher};
pub use maintenance::MaintenanceWorker;
