// src/lib.rs
//! Simulation Orchestration Library
//!
//! Coordinates long-running, externally executed simulation jobs: expands
//! parameterized configurations into concrete runs, groups them into
//! experiments, tracks every run through a task backend, derives experiment
//! status from its children and builds cross-run summaries.
//!
//! # Architecture
//!
//! The crate is structured into several key modules:
//!
//! - **expansion**: Cartesian expansion of configuration documents, run naming
//! - **model**: configuration documents, records and the job status model
//! - **runtime**: run executor, worker pool and collaborator contracts
//! - **registry**: record storage and job update propagation
//! - **orchestrator**: experiment creation, dispatch and cancellation
//! - **summary**: simulation and experiment summaries (JSON, CSV)
//! - **service**: the command surface used by request layers
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration, errors and retries

pub mod expansion;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod summary;
pub mod utils;

// Re-export commonly used types
pub use model::{ConcreteConfig, ConfigDocument, Creator, JobStatus};
pub use orchestrator::{CancelReport, ExperimentRequest, Orchestrator, SimulationRequest};
pub use service::{SimulationService, SummaryFormat, SummaryOutput};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
