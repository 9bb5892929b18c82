// SPDX-License-Identifier: MIT

//! Startup adoption: parents left non-terminal by a previous process get
//! fresh monitors.

use crate::orchestrator::Orchestrator;
use quaero_core::job::meta;
use quaero_core::{Clock, JobStatus, QueueJobState};
use quaero_storage::JobStore;
use std::sync::Arc;
use std::time::Duration;

const ADOPT_SCAN_LIMIT: usize = 10_000;

/// Non-terminal parents whose heartbeat is older than `stale_after`.
///
/// A live monitor refreshes `heartbeat_ms` with every status/progress
/// write; a parent without a recent heartbeat has no monitor watching it.
pub fn stale_parents<C: Clock>(
    jobs: &JobStore<C>,
    now_ms: u64,
    stale_after: Duration,
) -> Vec<QueueJobState> {
    let mut stale = Vec::new();
    for status in [JobStatus::Pending, JobStatus::Running] {
        let states = match jobs.list_by_status(status, ADOPT_SCAN_LIMIT) {
            Ok(states) => states,
            Err(e) => {
                tracing::error!(error = %e, "stale parent scan failed");
                continue;
            }
        };
        for state in states {
            if !state.queue_job.is_parent() {
                continue;
            }
            let heartbeat = state
                .metadata
                .get(meta::HEARTBEAT_MS)
                .and_then(|v| v.as_u64())
                .unwrap_or(state.queue_job.created_at_ms);
            if now_ms.saturating_sub(heartbeat) >= stale_after.as_millis() as u64 {
                stale.push(state);
            }
        }
    }
    stale
}

/// Adopt every stale parent with a fresh monitor.
pub fn adopt_parents<C: Clock>(
    orchestrator: &Arc<Orchestrator<C>>,
    jobs: &JobStore<C>,
    now_ms: u64,
    stale_after: Duration,
) -> usize {
    let stale = stale_parents(jobs, now_ms, stale_after);
    let count = stale.len();
    for state in stale {
        tracing::info!(parent_id = %state.queue_job.id, status = %state.status, "adopting orphaned parent");
        let _monitor = orchestrator.adopt_monitor(&state);
    }
    count
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
