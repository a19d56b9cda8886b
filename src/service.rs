// src/service.rs
//! Command surface
//!
//! The operations a request layer calls. Every command resolves ids through
//! the registry; records created without an explicit parent land in the
//! root folder.
//!
//! | Command | Method |
//! |---|---|
//! | create simulation / experiment | `create_simulation`, `create_experiment` |
//! | list / get | `list_simulations`, `list_experiments`, `get_*`, `list_folder` |
//! | mark complete | `mark_complete` |
//! | archive | `set_archived` |
//! | cancel (single or cascading) | `cancel` |
//! | summary (JSON or CSV, range filters) | `simulation_summary`, `experiment_summary` |

use crate::model::records::{Container, ContainerKind};
use crate::orchestrator::{CancelReport, ExperimentRequest, Launch, Orchestrator, SimulationRequest};
use crate::registry::store::RecordQuery;
use crate::runtime::collaborators::{ArtifactSink, JobBackend};
use crate::runtime::engine::SimulationEngine;
use crate::summary::{experiment_csv, simulation_csv, RangeFilter, SummaryAggregator};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Output shape of a summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFormat {
    Json,
    Csv,
}

impl FromStr for SummaryFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(SummaryFormat::Json),
            "csv" => Ok(SummaryFormat::Csv),
            other => Err(EngineError::InvalidConfiguration(format!(
                "unknown summary format {:?}, expected json or csv",
                other
            ))),
        }
    }
}

impl fmt::Display for SummaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryFormat::Json => f.write_str("json"),
            SummaryFormat::Csv => f.write_str("csv"),
        }
    }
}

/// A rendered summary
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryOutput {
    Json(Value),
    Csv(String),
}

impl SummaryOutput {
    /// Text form, pretty-printed for JSON
    pub fn render(&self) -> Result<String> {
        match self {
            SummaryOutput::Json(value) => Ok(serde_json::to_string_pretty(value)?),
            SummaryOutput::Csv(text) => Ok(text.clone()),
        }
    }
}

/// Entry point for every command
pub struct SimulationService<E: SimulationEngine> {
    orchestrator: Orchestrator<E>,
    summaries: SummaryAggregator,
    root_id: String,
}

impl<E: SimulationEngine> SimulationService<E> {
    /// Build the service and create its root folder
    pub async fn new(
        engine: Arc<E>,
        sink: Arc<dyn ArtifactSink>,
        jobs: Arc<dyn JobBackend>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let orchestrator = Orchestrator::new(engine, Arc::clone(&sink), jobs, config);
        let summaries = SummaryAggregator::new(
            Arc::clone(orchestrator.registry()),
            Arc::clone(&sink),
            config.retry.policy(),
        );

        let mut service = Self {
            orchestrator,
            summaries,
            root_id: String::new(),
        };
        let root = service.create_folder(None, &config.storage.root_folder).await?;
        service.root_id = root.id;

        info!(root_id = %service.root_id, "Simulation service ready");
        Ok(service)
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn orchestrator(&self) -> &Orchestrator<E> {
        &self.orchestrator
    }

    /// Create a plain folder
    pub async fn create_folder(&self, parent_id: Option<&str>, name: &str) -> Result<Container> {
        let folder = self
            .orchestrator
            .sink()
            .create_container(parent_id, name)
            .await
            .map_err(|e| EngineError::from_collaborator("create_folder", e))?;

        let container = Container {
            id: folder.id,
            parent_id: folder.parent_id,
            name: folder.name,
            kind: ContainerKind::Generic,
        };
        self.orchestrator.registry().insert(container.clone());
        Ok(container)
    }

    pub async fn create_simulation(&self, mut request: SimulationRequest) -> Result<Launch> {
        if request.parent_id.is_none() {
            request.parent_id = Some(self.root_id.clone());
        }
        self.orchestrator.create_simulation(request).await
    }

    pub async fn create_experiment(&self, mut request: ExperimentRequest) -> Result<Launch> {
        if request.parent_id.is_none() {
            request.parent_id = Some(self.root_id.clone());
        }
        self.orchestrator.create_experiment(request).await
    }

    pub fn list_simulations(&self, include_archived: bool) -> Vec<Container> {
        self.orchestrator.registry().list_simulations(include_archived)
    }

    pub fn list_experiments(&self, include_archived: bool) -> Vec<Container> {
        self.orchestrator.registry().list_experiments(include_archived)
    }

    /// Direct children of a folder; plain folders only with `include_all_records`
    pub fn list_folder(&self, folder_id: &str, include_all_records: bool) -> Vec<Container> {
        self.orchestrator
            .registry()
            .find(&RecordQuery::new().parent(folder_id), include_all_records)
    }

    pub fn get_simulation(&self, id: &str) -> Result<Container> {
        self.orchestrator.registry().get_simulation(id)
    }

    pub fn get_experiment(&self, id: &str) -> Result<Container> {
        self.orchestrator.registry().get_experiment(id)
    }

    pub fn mark_complete(&self, simulation_id: &str) -> Result<Container> {
        self.orchestrator.registry().mark_complete(simulation_id)
    }

    pub fn set_archived(&self, id: &str, archived: bool) -> Result<Container> {
        self.orchestrator.registry().set_archived(id, archived)
    }

    /// Cancel a simulation, or every active child of an experiment
    pub async fn cancel(&self, id: &str) -> Result<CancelReport> {
        let container = self.orchestrator.registry().get(id)?;

        match &container.kind {
            ContainerKind::Experiment(_) => self.orchestrator.cancel_experiment(id).await,
            ContainerKind::Simulation(sim) if sim.status.is_terminal() => Ok(CancelReport {
                skipped: vec![container.id.clone()],
                ..Default::default()
            }),
            ContainerKind::Simulation(_) => {
                self.orchestrator.cancel_simulation(id).await?;
                Ok(CancelReport {
                    canceled: vec![container.id.clone()],
                    ..Default::default()
                })
            }
            ContainerKind::Generic => Err(EngineError::InvalidConfiguration(format!(
                "{} is not a simulation or experiment",
                id
            ))),
        }
    }

    pub async fn simulation_summary(
        &self,
        simulation_id: &str,
        format: SummaryFormat,
    ) -> Result<SummaryOutput> {
        let summary = self.summaries.simulation_summary(simulation_id).await?;
        match format {
            SummaryFormat::Json => Ok(SummaryOutput::Json(serde_json::to_value(&summary)?)),
            SummaryFormat::Csv => Ok(SummaryOutput::Csv(simulation_csv(&summary)?)),
        }
    }

    pub async fn experiment_summary(
        &self,
        experiment_id: &str,
        filters: &[RangeFilter],
        format: SummaryFormat,
    ) -> Result<SummaryOutput> {
        let summary = self
            .summaries
            .experiment_summary(experiment_id, filters)
            .await?;
        match format {
            SummaryFormat::Json => Ok(SummaryOutput::Json(serde_json::to_value(&summary)?)),
            SummaryFormat::Csv => Ok(SummaryOutput::Csv(experiment_csv(&summary)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::document::{ConcreteConfig, ConfigDocument, ParamValue, Scalar};
    use crate::model::records::Creator;
    use crate::model::status::JobStatus;
    use crate::runtime::local::{LinearEngine, LocalArtifactSink, LocalJobBackend};

    async fn service() -> SimulationService<LinearEngine> {
        let mut config = EngineConfig::default();
        config.runtime.visualization_interval = 1.0;
        config.retry.initial_delay_ms = 0;
        config.retry.max_delay_ms = 0;

        SimulationService::new(
            Arc::new(LinearEngine::new(1.0)),
            Arc::new(LocalArtifactSink::new()),
            Arc::new(LocalJobBackend::new()),
            &config,
        )
        .await
        .unwrap()
    }

    fn creator() -> Creator {
        Creator::new("u1", "Ada", "Lovelace")
    }

    fn experiment_request() -> ExperimentRequest {
        ExperimentRequest {
            parent_id: None,
            name: "sweep".to_string(),
            document: ConfigDocument::new().with(
                "fungus",
                "init_num",
                ParamValue::List(vec![Scalar::Int(10), Scalar::Int(20)]),
            ),
            runs_per_config: 1,
            target_time: Some(3.0),
            creator: creator(),
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<SummaryFormat>().unwrap(), SummaryFormat::Csv);
        assert_eq!("json".parse::<SummaryFormat>().unwrap(), SummaryFormat::Json);
        assert!("xml".parse::<SummaryFormat>().is_err());
    }

    #[tokio::test]
    async fn test_experiment_end_to_end() {
        let service = service().await;
        let launch = service.create_experiment(experiment_request()).await.unwrap();
        let experiment_id = launch.id().to_string();
        assert_eq!(launch.container.parent_id.as_deref(), Some(service.root_id()));

        for run in launch.runs {
            run.wait().await.unwrap();
        }

        let experiment = service.get_experiment(&experiment_id).unwrap();
        assert_eq!(experiment.as_experiment().unwrap().status, JobStatus::Success);

        let csv = service
            .experiment_summary(&experiment_id, &[], SummaryFormat::Csv)
            .await
            .unwrap()
            .render()
            .unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("time,sweep-run-0-fungus.init_num-10/fungus.init_num"));
        assert_eq!(lines.count(), 3);

        let filtered = service
            .experiment_summary(
                &experiment_id,
                &[RangeFilter::new("fungus", "init_num", Some(15.0), None)],
                SummaryFormat::Json,
            )
            .await
            .unwrap();
        match filtered {
            SummaryOutput::Json(value) => {
                assert_eq!(value["children"].as_array().unwrap().len(), 1)
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_simulation_lifecycle_commands() {
        let service = service().await;
        let launch = service
            .create_simulation(SimulationRequest {
                parent_id: None,
                name: "single".to_string(),
                config: ConcreteConfig::default(),
                target_time: Some(2.0),
                creator: creator(),
            })
            .await
            .unwrap();
        let id = launch.id().to_string();
        for run in launch.runs {
            run.wait().await.unwrap();
        }

        assert_eq!(service.list_simulations(false).len(), 1);
        service.set_archived(&id, true).unwrap();
        assert!(service.list_simulations(false).is_empty());
        assert_eq!(service.list_simulations(true).len(), 1);

        let report = service.cancel(&id).await.unwrap();
        assert_eq!(report.skipped, vec![id.clone()]);

        let summary = service
            .simulation_summary(&id, SummaryFormat::Json)
            .await
            .unwrap();
        match summary {
            SummaryOutput::Json(value) => {
                assert_eq!(value["steps"].as_object().unwrap().len(), 2);
                assert_eq!(value["complete"], serde_json::json!(true));
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_folder_listing() {
        let service = service().await;
        let root = service.root_id().to_string();
        service.create_folder(Some(&root), "plain").await.unwrap();
        let launch = service
            .create_simulation(SimulationRequest {
                parent_id: None,
                name: "single".to_string(),
                config: ConcreteConfig::default(),
                target_time: Some(1.0),
                creator: creator(),
            })
            .await
            .unwrap();
        for run in launch.runs {
            run.wait().await.unwrap();
        }

        assert_eq!(service.list_folder(&root, false).len(), 1);
        assert_eq!(service.list_folder(&root, true).len(), 2);

        let folder_cancel = service.cancel(&root).await;
        assert!(matches!(folder_cancel, Err(EngineError::InvalidConfiguration(_))));
    }
}
