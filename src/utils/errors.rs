// src/utils/errors.rs
//! Error types for the orchestration engine
//!
//! Two layers:
//!
//! - [`CollaboratorError`]: what an external collaborator (artifact sink,
//!   job backend, simulation engine) reports back. Carries enough detail to
//!   decide whether a call may be retried.
//! - [`EngineError`]: everything the core surfaces to its callers.

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, EngineError>;

/// Response codes that mark a collaborator call as safe to retry
///
/// Request too large, rate limited, bad gateway, overloaded, gateway timeout.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[413, 429, 502, 503, 504];

/// Failure reported by an external collaborator
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    /// The collaborator answered with an error status
    #[error("collaborator responded with status {code}: {message}")]
    Status { code: u16, message: String },

    /// The job was canceled before this status update arrived
    #[error("job {0} was already canceled")]
    AlreadyCanceled(String),

    /// The referenced container or job does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Connection-level failure (no response at all)
    #[error("connection failed: {0}")]
    Connection(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl CollaboratorError {
    /// Build a status error
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Whether the failure is transient and the call may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { code, .. } => RETRYABLE_STATUS_CODES.contains(code),
            _ => false,
        }
    }
}

/// Errors surfaced by the orchestration core
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or missing parameters; the caller can fix the request
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A retryable collaborator failure
    #[error("transient failure during {operation}: {source}")]
    TransientIo {
        operation: String,
        #[source]
        source: CollaboratorError,
    },

    /// A cancellation won the race against a status update
    #[error("job {0} was already canceled")]
    AlreadyCanceled(String),

    /// Unexpected failure while executing a run
    #[error("execution failed: {0}")]
    ExecutionError(String),

    /// A transient failure that outlasted the retry budget
    #[error("execution failed: {operation} gave up after {attempts} attempts")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },

    /// A child simulation does not belong to any experimental-variable group
    #[error("simulation {simulation_id} matches no experimental-variable group")]
    AggregationIntegrity { simulation_id: String },

    /// Unknown record
    #[error("not found: {0}")]
    NotFound(String),

    /// Non-retryable collaborator failure
    #[error("collaborator error during {operation}: {source}")]
    Collaborator {
        operation: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl EngineError {
    /// Wrap a collaborator failure raised while performing `operation`
    pub fn from_collaborator(operation: impl Into<String>, source: CollaboratorError) -> Self {
        let operation = operation.into();
        match source {
            CollaboratorError::AlreadyCanceled(job_id) => Self::AlreadyCanceled(job_id),
            CollaboratorError::NotFound(what) => Self::NotFound(what),
            source if source.is_retryable() => Self::TransientIo { operation, source },
            source => Self::Collaborator { operation, source },
        }
    }

    /// Whether this error maps to a client error at the request layer
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_) | Self::NotFound(_))
    }

    /// Whether this error is the "already canceled" early-exit signal
    pub fn is_already_canceled(&self) -> bool {
        matches!(self, Self::AlreadyCanceled(_))
    }
}
