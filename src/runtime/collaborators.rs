// src/runtime/collaborators.rs
//! Contracts of the external collaborators the core talks to
//!
//! - **ArtifactSink**: object store holding run folders, checkpoint
//!   sub-folders and uploaded files
//! - **JobBackend**: task backend owning job status and progress; also the
//!   source of job update events
//! - **SimulationCompleter**: marks a simulation record complete
//!
//! Every call is treated as blocking from the executor's point of view and
//! may fail with a [`CollaboratorError`].

use crate::model::records::{JobContext, JobRecord};
use crate::model::status::JobStatus;
use crate::utils::errors::CollaboratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Result type returned by collaborators
pub type CallResult<T> = std::result::Result<T, CollaboratorError>;

/// A container as seen by the artifact sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub parent_id: Option<String>,

    /// Final name, possibly renamed on conflict
    pub name: String,

    pub metadata: Map<String, Value>,

    /// Names of the uploaded files
    pub files: Vec<String>,
}

/// Artifact store
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Create a container; a sibling with the same name causes a rename
    async fn create_container(&self, parent_id: Option<&str>, name: &str)
        -> CallResult<ContainerInfo>;

    /// Merge `metadata` into the container's metadata
    async fn set_metadata(&self, id: &str, metadata: Map<String, Value>) -> CallResult<()>;

    /// Upload a local file into the container
    async fn upload_file(&self, id: &str, path: &Path) -> CallResult<()>;

    async fn get_container(&self, id: &str) -> CallResult<ContainerInfo>;

    /// Direct children of a container
    async fn list_containers(&self, parent_id: &str) -> CallResult<Vec<ContainerInfo>>;

    /// Remove a container and everything below it
    async fn remove_container(&self, id: &str) -> CallResult<()>;
}

/// Task backend
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Register a new job at `INACTIVE`
    async fn create_job(&self, title: &str, context: JobContext, total: f64)
        -> CallResult<JobRecord>;

    /// Update status and progress
    ///
    /// Fails with [`CollaboratorError::AlreadyCanceled`] once the job was canceled.
    async fn set_status(&self, job_id: &str, status: JobStatus, current: f64, total: f64)
        -> CallResult<()>;

    async fn get_status(&self, job_id: &str) -> CallResult<JobStatus>;

    async fn get_job(&self, job_id: &str) -> CallResult<JobRecord>;

    /// Request cancellation; a no-op for jobs that already finished
    async fn cancel(&self, job_id: &str) -> CallResult<()>;

    /// Forget a job that never ran
    async fn remove_job(&self, job_id: &str) -> CallResult<()>;

    /// Register a handler invoked after every status or progress change
    fn subscribe(&self, handler: Arc<dyn JobEventHandler>);
}

/// Receiver of job update events
#[async_trait]
pub trait JobEventHandler: Send + Sync {
    async fn on_job_update(&self, job: JobRecord);
}

/// Marks simulation records complete
#[async_trait]
pub trait SimulationCompleter: Send + Sync {
    async fn mark_complete(&self, simulation_id: &str) -> CallResult<()>;
}
