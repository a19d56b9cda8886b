// src/model/mod.rs
//! Data model shared by every component
//!
//! - **document**: parameterized and concrete configuration documents
//! - **status**: the job status state set and aggregation rules
//! - **records**: persisted simulation, experiment and job shapes

pub mod document;
pub mod records;
pub mod status;

pub use document::{ConcreteConfig, ConfigDocument, ExperimentalVariable, ParamValue, Scalar};
pub use records::{
    Checkpoint, Container, ContainerKind, Creator, ExperimentRecord, JobContext, JobRecord,
    SimulationRecord,
};
pub use status::{aggregate_progress, aggregate_status, simulation_progress, JobProgress, JobStatus};
