// src/runtime/engine.rs
//! Simulation engine contract
//!
//! The engine turns a concrete configuration and a target stopping time into
//! a lazy, finite, non-restartable stream of `(state, phase)` pairs. State
//! time never decreases and the last pair carries [`Phase::Final`].
//!
//! ```text
//! start(config, target) ──► (s0, Step) ─► (s1, Step) ─► … ─► (sn, Final)
//!                                │
//!                   render(state, dir) / summary_statistics(state)
//! ```

use crate::model::document::ConcreteConfig;
use crate::utils::errors::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Whether a state is an intermediate step or the last one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Step,
    Final,
}

/// A simulation state as far as the orchestrator cares
pub trait EngineState: Send + Sync {
    /// Simulated time of this state
    fn time(&self) -> f64;
}

/// Stream of engine states
pub type StateStream<S> = BoxStream<'static, Result<(S, Phase)>>;

/// External simulation engine
#[async_trait]
pub trait SimulationEngine: Send + Sync + 'static {
    type State: EngineState + 'static;

    /// Begin a run; states are only computed as the stream is polled
    fn start(&self, config: &ConcreteConfig, target_time: f64) -> Result<StateStream<Self::State>>;

    /// Export visualization artifacts of `state` into `destination`
    async fn render(&self, state: &Self::State, destination: &Path) -> Result<()>;

    /// Nested summary statistics of `state`
    fn summary_statistics(&self, state: &Self::State) -> serde_json::Value;
}
