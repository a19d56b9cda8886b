// src/registry/store.rs
//! Record registry
//!
//! Holds every [`Container`] the orchestrator created, keyed by container
//! id. Simulation and experiment ids are their artifact container ids, so a
//! record and its artifacts are always found under the same key.
//!
//! Lookups that go through [`Registry::find`] only return simulation records
//! unless `include_all_records` is set, which name-conflict checks and folder
//! listings need.

use crate::model::records::{Container, ContainerKind, ExperimentRecord, SimulationRecord};
use crate::runtime::collaborators::{CallResult, SimulationCompleter};
use crate::utils::errors::{CollaboratorError, EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

/// Filter for [`Registry::find`]
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Only containers directly below this parent
    pub parent_id: Option<String>,

    /// Only records created by this user id
    pub creator: Option<String>,

    /// Only records whose name contains this text
    pub name_contains: Option<String>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn creator(mut self, creator: &str) -> Self {
        self.creator = Some(creator.to_string());
        self
    }

    pub fn name_contains(mut self, text: &str) -> Self {
        self.name_contains = Some(text.to_string());
        self
    }

    fn matches(&self, container: &Container) -> bool {
        if let Some(parent) = &self.parent_id {
            if container.parent_id.as_deref() != Some(parent.as_str()) {
                return false;
            }
        }

        if let Some(text) = &self.name_contains {
            if !container.name.contains(text.as_str()) {
                return false;
            }
        }

        if let Some(creator) = &self.creator {
            let owner = match &container.kind {
                ContainerKind::Simulation(sim) => Some(&sim.creator),
                ContainerKind::Experiment(exp) => Some(&exp.creator),
                ContainerKind::Generic => None,
            };
            if owner != Some(creator) {
                return false;
            }
        }

        true
    }
}

/// In-memory record store
#[derive(Default)]
pub struct Registry {
    containers: DashMap<String, Container>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, container: Container) {
        debug!("Registering {} ({})", container.name, container.id);
        self.containers.insert(container.id.clone(), container);
    }

    pub fn remove(&self, id: &str) -> Option<Container> {
        self.containers.remove(id).map(|(_, container)| container)
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn get(&self, id: &str) -> Result<Container> {
        self.containers
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| EngineError::NotFound(format!("record {}", id)))
    }

    /// A container that must hold a simulation record
    pub fn get_simulation(&self, id: &str) -> Result<Container> {
        let container = self.get(id)?;
        match container.kind {
            ContainerKind::Simulation(_) => Ok(container),
            _ => Err(EngineError::NotFound(format!("simulation {}", id))),
        }
    }

    /// A container that must hold an experiment record
    pub fn get_experiment(&self, id: &str) -> Result<Container> {
        let container = self.get(id)?;
        match container.kind {
            ContainerKind::Experiment(_) => Ok(container),
            _ => Err(EngineError::NotFound(format!("experiment {}", id))),
        }
    }

    /// Apply `update` to a simulation record in place
    pub fn update_simulation<R, F>(&self, id: &str, update: F) -> Result<R>
    where
        F: FnOnce(&mut SimulationRecord) -> R,
    {
        let mut entry = self
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("simulation {}", id)))?;
        let record = entry
            .as_simulation_mut()
            .ok_or_else(|| EngineError::NotFound(format!("simulation {}", id)))?;
        Ok(update(record))
    }

    /// Apply `update` to an experiment record in place
    pub fn update_experiment<R, F>(&self, id: &str, update: F) -> Result<R>
    where
        F: FnOnce(&mut ExperimentRecord) -> R,
    {
        let mut entry = self
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("experiment {}", id)))?;
        let record = entry
            .as_experiment_mut()
            .ok_or_else(|| EngineError::NotFound(format!("experiment {}", id)))?;
        Ok(update(record))
    }

    /// Containers matching `query`, sorted by name
    ///
    /// Without `include_all_records` only simulation records are returned.
    pub fn find(&self, query: &RecordQuery, include_all_records: bool) -> Vec<Container> {
        let mut found: Vec<Container> = self
            .containers
            .iter()
            .filter(|c| include_all_records || c.as_simulation().is_some())
            .filter(|c| query.matches(c.value()))
            .map(|c| c.clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// Simulation records, newest first, archived ones only on request
    pub fn list_simulations(&self, include_archived: bool) -> Vec<Container> {
        let mut sims: Vec<Container> = self
            .containers
            .iter()
            .filter(|c| {
                c.as_simulation()
                    .map(|sim| include_archived || !sim.archived)
                    .unwrap_or(false)
            })
            .map(|c| c.clone())
            .collect();
        sims.sort_by(|a, b| {
            let a_created = a.as_simulation().map(|s| s.created_at);
            let b_created = b.as_simulation().map(|s| s.created_at);
            b_created.cmp(&a_created).then_with(|| a.name.cmp(&b.name))
        });
        sims
    }

    /// Experiment records, newest first, archived ones only on request
    pub fn list_experiments(&self, include_archived: bool) -> Vec<Container> {
        let mut experiments: Vec<Container> = self
            .containers
            .iter()
            .filter(|c| {
                c.as_experiment()
                    .map(|exp| include_archived || !exp.archived)
                    .unwrap_or(false)
            })
            .map(|c| c.clone())
            .collect();
        experiments.sort_by(|a, b| {
            let a_created = a.as_experiment().map(|e| e.created_at);
            let b_created = b.as_experiment().map(|e| e.created_at);
            b_created.cmp(&a_created).then_with(|| a.name.cmp(&b.name))
        });
        experiments
    }

    /// Child simulations of an experiment, sorted by name
    pub fn children_of(&self, experiment_id: &str) -> Result<Vec<Container>> {
        let experiment = self.get_experiment(experiment_id)?;
        let ids: Vec<String> = experiment
            .as_experiment()
            .map(|exp| exp.child_ids().map(str::to_string).collect())
            .unwrap_or_default();

        let mut children: Vec<Container> = ids
            .iter()
            .filter_map(|id| self.containers.get(id).map(|c| c.clone()))
            .filter(|c| c.as_simulation().is_some())
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    /// Set the archived flag of a simulation or experiment
    pub fn set_archived(&self, id: &str, archived: bool) -> Result<Container> {
        let mut entry = self
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("record {}", id)))?;

        match &mut entry.kind {
            ContainerKind::Simulation(sim) => sim.archived = archived,
            ContainerKind::Experiment(exp) => exp.archived = archived,
            ContainerKind::Generic => {
                return Err(EngineError::InvalidConfiguration(format!(
                    "{} is not a simulation or experiment",
                    id
                )))
            }
        }

        info!(record_id = id, archived = archived, "Archive flag updated");
        Ok(entry.clone())
    }

    /// Flag a simulation as complete
    pub fn mark_complete(&self, id: &str) -> Result<Container> {
        self.update_simulation(id, |sim| sim.complete = true)?;
        info!(simulation_id = id, "Simulation marked complete");
        self.get(id)
    }
}

#[async_trait]
impl SimulationCompleter for Registry {
    async fn mark_complete(&self, simulation_id: &str) -> CallResult<()> {
        Registry::mark_complete(self, simulation_id)
            .map(|_| ())
            .map_err(|e| CollaboratorError::NotFound(e.to_string()))
    }
}
