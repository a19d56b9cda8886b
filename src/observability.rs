// src/observability.rs
//! Logging and metrics setup
//!
//! - **init_tracing**: `tracing-subscriber` registry with an `EnvFilter`
//!   (`RUST_LOG` wins over the configured level) and a pretty or JSON
//!   formatter
//! - **init_metrics**: Prometheus recorder for the `metrics` counters
//!
//! Metrics recorded by the crate:
//!
//! ```text
//! orchestrator_runs_started_total
//! orchestrator_runs_finished_total{outcome}
//! orchestrator_checkpoints_total
//! orchestrator_retries_total{operation}
//! orchestrator_experiments_created_total
//! orchestrator_experiments_finished_total{status}
//! orchestrator_open_experiment_queues
//! ```

use crate::utils::config::ObservabilityConfig;
use anyhow::{anyhow, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| anyhow!("invalid log level {:?}: {}", config.log_level, e))?;

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()?;
    }

    Ok(())
}

/// Install the Prometheus metrics recorder
///
/// The returned handle renders the current metrics in text format.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow!("failed to install metrics recorder: {}", e))?;
    Ok(handle)
}

