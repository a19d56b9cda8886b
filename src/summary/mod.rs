// src/summary/mod.rs
//! Cross-run statistical summaries
//!
//! - **flatten**: nested statistics → dotted keys
//! - **grouping**: experimental-variable groups and range filters
//! - **table**: CSV rendering
//!
//! A simulation summary is its checkpoints keyed by simulated time. An
//! experiment summary places every child in its variable group and aligns
//! all children on the union of their observed times. Children that are
//! still running simply have fewer time steps.

pub mod flatten;
pub mod grouping;
pub mod table;

pub use flatten::flatten_stats;
pub use grouping::{assign_group, indexed_groups, Group, RangeFilter};
pub use table::{experiment_csv, simulation_csv};

use crate::model::document::ExperimentalVariable;
use crate::model::records::Checkpoint;
use crate::model::status::{aggregate_progress, aggregate_status, JobStatus};
use crate::registry::store::Registry;
use crate::runtime::collaborators::ArtifactSink;
use crate::utils::errors::{EngineError, Result};
use crate::utils::retry::RetryPolicy;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Flattened statistics at one simulated time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeStep {
    pub time: f64,
    pub stats: BTreeMap<String, Value>,
}

/// Serialize steps as `{time: stats}` in time order
#[allow(clippy::ptr_arg)]
fn serialize_steps<S: Serializer>(steps: &Vec<TimeStep>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(steps.iter().map(|step| (flatten::time_key(step.time), &step.stats)))
}

/// Summary of one simulation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSummary {
    pub id: String,
    pub name: String,
    pub complete: bool,
    pub status: JobStatus,

    /// Sorted by time, one entry per distinct time
    #[serde(serialize_with = "serialize_steps")]
    pub steps: Vec<TimeStep>,
}

impl SimulationSummary {
    /// The `{time: stats}` mapping
    pub fn time_series(&self) -> Value {
        let map = self
            .steps
            .iter()
            .map(|step| {
                let stats = step
                    .stats
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<serde_json::Map<_, _>>();
                (flatten::time_key(step.time), Value::Object(stats))
            })
            .collect::<serde_json::Map<_, _>>();
        Value::Object(map)
    }
}

/// One child of an experiment summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildSummary {
    pub id: String,
    pub name: String,
    pub complete: bool,
    pub status: JobStatus,
    pub progress: f64,

    /// Index into [`ExperimentSummary::groups`]
    pub group: usize,

    #[serde(serialize_with = "serialize_steps")]
    pub stats: Vec<TimeStep>,
}

/// Summary of an experiment, restricted to children passing the filters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSummary {
    pub id: String,
    pub name: String,
    pub variables: Vec<ExperimentalVariable>,
    pub groups: Vec<Group>,

    /// Derived from the included children
    pub status: JobStatus,
    pub progress: f64,

    /// Ordered by group, then name
    pub children: Vec<ChildSummary>,

    /// Union of the children's times, sorted numerically
    pub times: Vec<f64>,
}

/// Builds summaries from records and checkpoint containers
pub struct SummaryAggregator {
    registry: Arc<Registry>,
    sink: Arc<dyn ArtifactSink>,
    retry: RetryPolicy,
}

impl SummaryAggregator {
    pub fn new(registry: Arc<Registry>, sink: Arc<dyn ArtifactSink>, retry: RetryPolicy) -> Self {
        Self {
            registry,
            sink,
            retry,
        }
    }

    /// Checkpoints of a simulation, sorted by time
    ///
    /// Sub-containers without a numeric `time` are not checkpoints and are
    /// skipped.
    pub async fn checkpoints(&self, simulation_id: &str) -> Result<Vec<Checkpoint>> {
        let folders = self
            .retry
            .run("list_checkpoints", || self.sink.list_containers(simulation_id))
            .await?;

        let mut checkpoints: Vec<Checkpoint> = folders
            .into_iter()
            .filter_map(|folder| {
                let Some(time) = folder.metadata.get("time").and_then(Value::as_f64) else {
                    debug!(container_id = %folder.id, "Skipping non-checkpoint container");
                    return None;
                };
                let stats = folder.metadata.get("stats").cloned().unwrap_or(Value::Null);
                Some(Checkpoint {
                    container_id: folder.id,
                    name: folder.name,
                    time,
                    stats,
                })
            })
            .collect();

        checkpoints.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(checkpoints)
    }

    async fn steps(&self, simulation_id: &str) -> Result<Vec<TimeStep>> {
        let mut steps: Vec<TimeStep> = self
            .checkpoints(simulation_id)
            .await?
            .into_iter()
            .map(|checkpoint| TimeStep {
                time: checkpoint.time,
                stats: flatten_stats(&checkpoint.stats),
            })
            .collect();

        // a repeated time keeps the latest checkpoint
        steps.reverse();
        steps.dedup_by(|a, b| a.time == b.time);
        steps.reverse();
        Ok(steps)
    }

    /// Summary of one simulation
    pub async fn simulation_summary(&self, simulation_id: &str) -> Result<SimulationSummary> {
        let container = self.registry.get_simulation(simulation_id)?;
        let record = container
            .as_simulation()
            .ok_or_else(|| EngineError::NotFound(format!("simulation {}", simulation_id)))?;

        Ok(SimulationSummary {
            id: container.id.clone(),
            name: container.name.clone(),
            complete: record.complete,
            status: record.status,
            steps: self.steps(simulation_id).await?,
        })
    }

    /// Summary of an experiment's children passing every filter
    pub async fn experiment_summary(
        &self,
        experiment_id: &str,
        filters: &[RangeFilter],
    ) -> Result<ExperimentSummary> {
        let container = self.registry.get_experiment(experiment_id)?;
        let record = container
            .as_experiment()
            .ok_or_else(|| EngineError::NotFound(format!("experiment {}", experiment_id)))?;

        let groups = indexed_groups(&record.variables);
        let mut children = Vec::new();

        for child in self.registry.children_of(experiment_id)? {
            let Some(sim) = child.as_simulation() else {
                continue;
            };

            let group = assign_group(&sim.config, &groups, &record.variables).ok_or_else(|| {
                EngineError::AggregationIntegrity {
                    simulation_id: child.id.clone(),
                }
            })?;

            if !grouping::passes_all(&sim.config, filters) {
                continue;
            }

            children.push(ChildSummary {
                id: child.id.clone(),
                name: child.name.clone(),
                complete: sim.complete,
                status: sim.status,
                progress: sim.progress,
                group,
                stats: self.steps(&child.id).await?,
            });
        }

        children.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));

        let mut times: Vec<f64> = children
            .iter()
            .flat_map(|child| child.stats.iter().map(|step| step.time))
            .collect();
        times.sort_by(f64::total_cmp);
        times.dedup();

        info!(
            experiment_id = experiment_id,
            children = children.len(),
            time_steps = times.len(),
            "Experiment summary built"
        );

        Ok(ExperimentSummary {
            id: container.id.clone(),
            name: container.name.clone(),
            variables: record.variables.clone(),
            groups,
            status: aggregate_status(children.iter().map(|c| c.status)),
            progress: aggregate_progress(children.iter().map(|c| c.progress)),
            children,
            times,
        })
    }
}
