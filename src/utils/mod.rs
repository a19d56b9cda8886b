// src/utils/mod.rs
//! Common utilities: configuration, error types and retry helpers

pub mod config;
pub mod errors;
pub mod retry;

pub use config::EngineConfig;
pub use errors::{CollaboratorError, EngineError, Result};
pub use retry::RetryPolicy;
