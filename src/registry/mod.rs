// src/registry/mod.rs
//! Record storage and status propagation
//!
//! - **store**: simulation, experiment and folder records
//! - **propagation**: job update events → simulation and experiment records

pub mod propagation;
pub mod store;

pub use propagation::StatusPropagator;
pub use store::{RecordQuery, Registry};
