// SPDX-License-Identifier: MIT

//! Built-in managers, one per action type.

mod agent;
mod crawler;
mod github;
mod maintenance;
mod search;
mod transform;

pub use agent::AgentManager;
pub use crawler::CrawlerManager;
pub use github::{GithubActionsFetchManager, GithubRepoFetchManager};
pub use maintenance::{DatabaseMaintenanceManager, MAINTENANCE_OPERATIONS};
pub use search::{PlacesSearchManager, WebSearchManager};
pub use transform::{ReindexManager, TransformManager};

use crate::manager::ManagerRegistry;
use quaero_core::Clock;
use std::sync::Arc;

/// Registry preloaded with every built-in manager.
pub fn builtin_registry<C: Clock>() -> ManagerRegistry<C> {
    let mut registry = ManagerRegistry::new();
    registry.register(Arc::new(CrawlerManager));
    registry.register(Arc::new(AgentManager));
    registry.register(Arc::new(DatabaseMaintenanceManager));
    registry.register(Arc::new(TransformManager));
    registry.register(Arc::new(ReindexManager));
    registry.register(Arc::new(PlacesSearchManager));
    registry.register(Arc::new(WebSearchManager));
    registry.register(Arc::new(GithubActionsFetchManager));
    registry.register(Arc::new(GithubRepoFetchManager));
    registry
}

#[cfg(test)]
#[path = "managers_tests.rs"]
mod tests;
