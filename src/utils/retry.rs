// src/utils/retry.rs
//! Bounded exponential backoff for collaborator calls
//!
//! Only failures whose [`CollaboratorError::is_retryable`] is true are
//! retried. Exhausting the attempt budget escalates to
//! [`EngineError::RetriesExhausted`] with the last transient failure as its
//! source; anything non-retryable propagates on the first failure.

use crate::utils::errors::{CollaboratorError, EngineError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after every failed attempt
    pub backoff_factor: f64,

    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately, for tests and local backends
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt number `attempt + 1` (attempt is 1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Run `call` until it succeeds, fails permanently, or the budget runs out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, CollaboratorError>>,
    {
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        error = %e,
                        "Retryable collaborator failure"
                    );
                    metrics::counter!("orchestrator_retries_total", "operation" => operation.to_string())
                        .increment(1);
                    debug!(operation = operation, backoff_ms = delay.as_millis() as u64, "Applying retry backoff");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(EngineError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(EngineError::from_collaborator(operation, e)),
                    });
                }
                Err(e) => return Err(EngineError::from_collaborator(operation, e)),
            }
        }
    }
}
