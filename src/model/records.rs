// src/model/records.rs
//! Persisted record shapes
//!
//! Every record is a [`Container`]. The role-specific payload lives in a
//! tagged [`ContainerKind`] and is serialized under its own `orchestrator`
//! key so it never collides with generic container metadata.

use crate::model::document::{ConcreteConfig, ConfigDocument, ExperimentalVariable};
use crate::model::status::{aggregate_progress, aggregate_status, JobProgress, JobStatus};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A stored container: generic folder, simulation or experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(flatten)]
    pub kind: ContainerKind,
}

/// Role of a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "orchestrator", rename_all = "snake_case")]
pub enum ContainerKind {
    Generic,
    Simulation(SimulationRecord),
    Experiment(ExperimentRecord),
}

impl Container {
    pub fn as_simulation(&self) -> Option<&SimulationRecord> {
        match &self.kind {
            ContainerKind::Simulation(sim) => Some(sim),
            _ => None,
        }
    }

    pub fn as_simulation_mut(&mut self) -> Option<&mut SimulationRecord> {
        match &mut self.kind {
            ContainerKind::Simulation(sim) => Some(sim),
            _ => None,
        }
    }

    pub fn as_experiment(&self) -> Option<&ExperimentRecord> {
        match &self.kind {
            ContainerKind::Experiment(exp) => Some(exp),
            _ => None,
        }
    }

    pub fn as_experiment_mut(&mut self) -> Option<&mut ExperimentRecord> {
        match &mut self.kind {
            ContainerKind::Experiment(exp) => Some(exp),
            _ => None,
        }
    }
}

/// One concrete simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    /// Resolved configuration for this run
    pub config: ConcreteConfig,

    /// Creating user id
    pub creator: String,

    /// Display name of the creating user
    pub author: String,

    pub created_at: DateTime<Utc>,

    /// Parent experiment, when created as part of one
    pub experiment_id: Option<String>,

    /// Job executing this run
    pub job_id: Option<String>,

    /// Target stopping time in simulation units
    pub target_time: f64,

    pub complete: bool,
    pub archived: bool,

    /// Progress in `[0, 100]`
    pub progress: f64,

    pub status: JobStatus,
}

impl SimulationRecord {
    pub fn new(
        config: ConcreteConfig,
        creator: &Creator,
        target_time: f64,
        experiment_id: Option<String>,
    ) -> Self {
        Self {
            config,
            creator: creator.id.clone(),
            author: creator.display_name(),
            created_at: Utc::now(),
            experiment_id,
            job_id: None,
            target_time,
            complete: false,
            archived: false,
            progress: 0.0,
            status: JobStatus::Inactive,
        }
    }
}

/// A named group of simulations sharing a base configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    /// Base (parameterized) configuration document
    pub config: ConfigDocument,

    /// Experimental variables in discovery order
    pub variables: Vec<ExperimentalVariable>,

    /// Repeats per Cartesian-product point
    pub runs_per_config: u32,

    pub target_time: f64,
    pub creator: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub archived: bool,

    /// Progress of each child, keyed by simulation id
    pub per_sim_progress: IndexMap<String, f64>,

    /// Status of each child, keyed by simulation id
    pub per_sim_status: IndexMap<String, JobStatus>,

    /// Mean of `per_sim_progress`
    pub progress: f64,

    /// Precedence aggregate of `per_sim_status`
    pub status: JobStatus,
}

impl ExperimentRecord {
    pub fn new(
        config: ConfigDocument,
        variables: Vec<ExperimentalVariable>,
        runs_per_config: u32,
        target_time: f64,
        creator: &Creator,
    ) -> Self {
        Self {
            config,
            variables,
            runs_per_config,
            target_time,
            creator: creator.id.clone(),
            author: creator.display_name(),
            created_at: Utc::now(),
            archived: false,
            per_sim_progress: IndexMap::new(),
            per_sim_status: IndexMap::new(),
            progress: 0.0,
            status: JobStatus::Inactive,
        }
    }

    /// Register a child at `INACTIVE` / 0
    pub fn register_child(&mut self, simulation_id: &str) {
        self.per_sim_progress.insert(simulation_id.to_string(), 0.0);
        self.per_sim_status
            .insert(simulation_id.to_string(), JobStatus::Inactive);
        self.recompute();
    }

    /// Record a child's latest progress/status and recompute the aggregate
    pub fn apply_child_update(&mut self, simulation_id: &str, progress: f64, status: JobStatus) {
        self.per_sim_progress.insert(simulation_id.to_string(), progress);
        self.per_sim_status.insert(simulation_id.to_string(), status);
        self.recompute();
    }

    /// Derive aggregated progress and status from the full per-child maps
    pub fn recompute(&mut self) {
        self.progress = aggregate_progress(self.per_sim_progress.values().copied());
        self.status = aggregate_status(self.per_sim_status.values().copied());
    }

    pub fn child_ids(&self) -> impl Iterator<Item = &str> {
        self.per_sim_status.keys().map(String::as_str)
    }
}

/// A timestamped artifact and statistics snapshot of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub container_id: String,
    pub name: String,
    pub time: f64,
    pub stats: serde_json::Value,
}

/// The user on whose behalf records are created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

impl Creator {
    pub fn new(id: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            id: id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Routing context attached to a job so updates reach the right records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub simulation_id: String,
    pub experiment_id: Option<String>,
}

/// Snapshot of a job as known to the task backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub title: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub context: JobContext,
    pub created_at: DateTime<Utc>,
}
