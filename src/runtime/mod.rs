// src/runtime/mod.rs
//! Run execution runtime
//!
//! This module provides everything needed to drive simulation runs:
//!
//! - **Engine**: contract of the external simulation engine
//! - **Collaborators**: artifact sink, job backend and completion contracts
//! - **Executor**: lifecycle of a single run (checkpoints, cancellation, errors)
//! - **Worker Pool**: bounded concurrent execution of submitted runs
//! - **Local**: in-process collaborators and a reference engine
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Worker Pool (N slots)                │
//! │   ┌──────────┐  ┌──────────┐  ┌──────────┐           │
//! │   │ Executor │  │ Executor │  │ Executor │  ...      │
//! │   └────┬─────┘  └────┬─────┘  └────┬─────┘           │
//! │        │             │             │                 │
//! │        ▼             ▼             ▼                 │
//! │   Engine stream ─► checkpoints ─► ArtifactSink       │
//! │                 └► status ──────► JobBackend ─► events│
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod collaborators;
pub mod engine;
pub mod executor;
pub mod local;
pub mod worker_pool;

pub use collaborators::{
    ArtifactSink, CallResult, ContainerInfo, JobBackend, JobEventHandler, SimulationCompleter,
};
pub use engine::{EngineState, Phase, SimulationEngine, StateStream};
pub use executor::{ExecutorConfig, RunExecutor, RunOutcome, RunTask};
pub use local::{LinearEngine, LinearState, LocalArtifactSink, LocalJobBackend};
pub use worker_pool::{PoolStats, RunHandle, WorkerPool, WorkerPoolConfig};
