// SPDX-License-Identifier: MIT

//! Shared rig for the scenario suite: a full engine over the in-memory
//! store with a controllable clock.

use quaero_core::{FakeClock, JobId, JobStatus, QueueJobState};
use quaero_definition::JobDefinition;
use quaero_engine::{Engine, EngineConfig, EngineDeps};
use quaero_storage::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

pub struct Rig {
    pub engine: Engine<FakeClock>,
    pub clock: FakeClock,
}

pub fn rig() -> Rig {
    rig_with(EngineConfig::default(), EngineDeps::default())
}

pub fn rig_with(config: EngineConfig, deps: EngineDeps) -> Rig {
    let clock = FakeClock::new();
    let engine =
        Engine::with_store(config, Arc::new(MemoryStore::new()), clock.clone(), deps).unwrap();
    Rig { engine, clock }
}

pub async fn started_rig() -> Rig {
    let rig = rig();
    rig.engine.start().await.unwrap();
    rig
}

pub fn put_def(rig: &Rig, body: &str) {
    rig.engine.definitions().put(JobDefinition::from_toml(body).unwrap()).unwrap();
}

/// Poll until the job reaches a terminal state, nudging the fake clock
/// forward so visibility timeouts and retries can elapse.
pub async fn await_terminal(rig: &Rig, id: &JobId) -> QueueJobState {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    loop {
        let state = rig.engine.get_job(id).unwrap();
        if state.is_terminal() {
            return state;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} never reached a terminal state (stuck in {:?})",
            state.status
        );
        rig.clock.advance(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn await_status(rig: &Rig, id: &JobId, expected: JobStatus) -> QueueJobState {
    let state = await_terminal(rig, id).await;
    assert_eq!(state.status, expected, "job {id}");
    state
}
