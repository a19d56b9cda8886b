// src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate, later sources override earlier ones:
//!
//! ```text
//! built-in defaults
//!     ↓
//! orchestrator.{toml,yaml,json}   (optional, working directory)
//!     ↓
//! SIMORCH__<SECTION>__<KEY>       (environment)
//! ```

use crate::utils::errors::{EngineError, Result};
use crate::utils::retry::RetryPolicy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run execution settings
    pub runtime: RuntimeConfig,

    /// Retry policy for collaborator calls
    pub retry: RetrySettings,

    /// Logging settings
    pub observability: ObservabilityConfig,

    /// Artifact layout
    pub storage: StorageConfig,
}

/// Run execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum runs executing at the same time (default: 4)
    pub max_concurrent_runs: usize,

    /// Simulated time between two checkpoints (default: 30)
    pub visualization_interval: f64,

    /// Poll the job for cancellation every N engine advances (default: 1)
    ///
    /// Cancellation latency is bounded by this many engine steps.
    pub cancel_poll_every: u32,

    /// Target stopping time for standalone simulations that omit one
    pub default_target_time: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            visualization_interval: 30.0,
            cancel_poll_every: 1,
            default_target_time: 20.0,
        }
    }
}

/// Retry settings as they appear in configuration sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON log lines instead of the human readable format
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Artifact layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Name of the root container runs are created under by the local sink
    pub root_folder: String,

    /// File name of the uploaded concrete configuration
    pub config_file_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_folder: "simulations".to_string(),
            config_file_name: "config.json".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default file name and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(Some("orchestrator"))
    }

    /// Load configuration from an optional file stem and the environment
    pub fn load_from(file_stem: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(stem) = file_stem {
            builder = builder.add_source(File::with_name(stem).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("SIMORCH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate semantic constraints
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_concurrent_runs == 0 {
            return Err(EngineError::InvalidConfiguration(
                "runtime.max_concurrent_runs must be at least 1".into(),
            ));
        }
        if !(self.runtime.visualization_interval > 0.0) {
            return Err(EngineError::InvalidConfiguration(
                "runtime.visualization_interval must be positive".into(),
            ));
        }
        if self.runtime.cancel_poll_every == 0 {
            return Err(EngineError::InvalidConfiguration(
                "runtime.cancel_poll_every must be at least 1".into(),
            ));
        }
        if !(self.runtime.default_target_time > 0.0) {
            return Err(EngineError::InvalidConfiguration(
                "runtime.default_target_time must be positive".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::InvalidConfiguration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !(self.retry.backoff_factor >= 1.0) {
            return Err(EngineError::InvalidConfiguration(
                "retry.backoff_factor must be >= 1".into(),
            ));
        }
        Ok(())
    }
}
