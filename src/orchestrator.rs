// src/orchestrator.rs
//! Experiment orchestration
//!
//! Creates simulations and experiments, wires every run to the worker pool
//! and cancels them again.
//!
//! # Experiment creation
//!
//! ```text
//! validate ──► expand ──► experiment container
//!                              │
//!                              ├─► per config × repeat:
//!                              │     child container ─► record ─► job (INACTIVE/0)
//!                              │
//!                              │   any failure ──► roll back everything created
//!                              ▼
//!                         dispatch: job QUEUED ─► worker pool
//! ```
//!
//! Nothing is dispatched before every child exists, so a failed creation
//! never leaves runs executing for an experiment that does not exist.

use crate::expansion::{expand, index_width, resolve_target_time, run_name, Expansion};
use crate::model::document::{ConcreteConfig, ConfigDocument};
use crate::model::records::{
    Container, ContainerKind, Creator, ExperimentRecord, JobContext, SimulationRecord,
};
use crate::model::status::JobStatus;
use crate::registry::propagation::StatusPropagator;
use crate::registry::store::Registry;
use crate::runtime::collaborators::{
    ArtifactSink, JobBackend, JobEventHandler, SimulationCompleter,
};
use crate::runtime::engine::SimulationEngine;
use crate::runtime::executor::{ExecutorConfig, RunExecutor, RunTask};
use crate::runtime::worker_pool::{PoolStats, RunHandle, WorkerPool, WorkerPoolConfig};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{CollaboratorError, EngineError, Result};
use crate::utils::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Parameters of a new experiment
#[derive(Debug, Clone)]
pub struct ExperimentRequest {
    /// Container the experiment is created in
    pub parent_id: Option<String>,

    /// Base name, also the prefix of every run name
    pub name: String,

    pub document: ConfigDocument,
    pub runs_per_config: u32,
    pub target_time: Option<f64>,
    pub creator: Creator,
}

/// Parameters of a new standalone simulation
#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub parent_id: Option<String>,
    pub name: String,
    pub config: ConcreteConfig,

    /// Falls back to `runtime.default_target_time`
    pub target_time: Option<f64>,

    pub creator: Creator,
}

/// A created record and the runs dispatched for it
#[derive(Debug)]
pub struct Launch {
    pub container: Container,
    pub runs: Vec<RunHandle>,
}

impl Launch {
    pub fn id(&self) -> &str {
        &self.container.id
    }
}

/// Outcome of a cascading cancel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelReport {
    /// Children whose job was asked to cancel
    pub canceled: Vec<String>,

    /// Children already in a terminal state
    pub skipped: Vec<String>,

    /// Children whose cancel request failed, with the error
    pub failed: Vec<(String, String)>,
}

impl CancelReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Everything created so far, removed again if creation fails
#[derive(Debug, Default)]
struct CreationLog {
    containers: Vec<String>,
    records: Vec<String>,
    jobs: Vec<String>,
    experiment: Option<String>,
}

/// Coordinates records, jobs and the worker pool
pub struct Orchestrator<E: SimulationEngine> {
    registry: Arc<Registry>,
    propagator: Arc<StatusPropagator>,
    sink: Arc<dyn ArtifactSink>,
    jobs: Arc<dyn JobBackend>,
    pool: WorkerPool<E>,
    retry: RetryPolicy,
    default_target_time: f64,
}

impl<E: SimulationEngine> Orchestrator<E> {
    /// Build an orchestrator and subscribe its propagator to `jobs`
    pub fn new(
        engine: Arc<E>,
        sink: Arc<dyn ArtifactSink>,
        jobs: Arc<dyn JobBackend>,
        config: &EngineConfig,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let propagator = Arc::new(StatusPropagator::new(Arc::clone(&registry)));
        jobs.subscribe(Arc::clone(&propagator) as Arc<dyn JobEventHandler>);

        let executor = RunExecutor::new(
            engine,
            Arc::clone(&sink),
            Arc::clone(&jobs),
            Arc::clone(&registry) as Arc<dyn SimulationCompleter>,
            ExecutorConfig::from(config),
        );
        let pool = WorkerPool::new(
            executor,
            WorkerPoolConfig {
                max_concurrent: config.runtime.max_concurrent_runs,
            },
        );

        Self {
            registry,
            propagator,
            sink,
            jobs,
            pool,
            retry: config.retry.policy(),
            default_target_time: config.runtime.default_target_time,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn sink(&self) -> &Arc<dyn ArtifactSink> {
        &self.sink
    }

    pub fn jobs(&self) -> &Arc<dyn JobBackend> {
        &self.jobs
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Create an experiment and dispatch all of its runs
    pub async fn create_experiment(&self, request: ExperimentRequest) -> Result<Launch> {
        let target_time = resolve_target_time(request.target_time, true, self.default_target_time)?;
        if request.runs_per_config < 1 {
            return Err(EngineError::InvalidConfiguration(
                "runs_per_config must be at least 1".into(),
            ));
        }
        if request.name.trim().is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "experiment name must not be empty".into(),
            ));
        }
        request.document.validate()?;

        let expansion = expand(&request.document);
        info!(
            experiment = %request.name,
            configs = expansion.len(),
            runs_per_config = request.runs_per_config,
            "Creating experiment"
        );

        let mut log = CreationLog::default();
        match self
            .create_experiment_records(&request, target_time, &expansion, &mut log)
            .await
        {
            Ok((container, tasks)) => {
                let runs = self.dispatch(tasks).await;
                metrics::counter!("orchestrator_experiments_created_total").increment(1);
                info!(
                    experiment_id = %container.id,
                    runs = runs.len(),
                    "Experiment {} dispatched",
                    container.name
                );
                Ok(Launch { container, runs })
            }
            Err(e) => {
                error!(experiment = %request.name, error = %e, "Experiment creation failed");
                self.rollback(log).await;
                Err(e)
            }
        }
    }

    async fn create_experiment_records(
        &self,
        request: &ExperimentRequest,
        target_time: f64,
        expansion: &Expansion,
        log: &mut CreationLog,
    ) -> Result<(Container, Vec<RunTask>)> {
        let folder = self
            .retry
            .run("create_experiment_container", || {
                self.sink
                    .create_container(request.parent_id.as_deref(), &request.name)
            })
            .await?;
        log.containers.push(folder.id.clone());

        let experiment_id = folder.id.clone();
        self.registry.insert(Container {
            id: folder.id.clone(),
            parent_id: folder.parent_id.clone(),
            name: folder.name.clone(),
            kind: ContainerKind::Experiment(ExperimentRecord::new(
                request.document.clone(),
                expansion.variables.clone(),
                request.runs_per_config,
                target_time,
                &request.creator,
            )),
        });
        log.records.push(experiment_id.clone());
        log.experiment = Some(experiment_id.clone());

        let width = index_width(request.runs_per_config);
        let mut tasks = Vec::with_capacity(expansion.len() * request.runs_per_config as usize);

        for config in &expansion.configs {
            for index in 0..request.runs_per_config {
                let name = run_name(&folder.name, index, width, &expansion.variables, config);
                let task = self
                    .create_run(
                        Some(&experiment_id),
                        &name,
                        config.clone(),
                        target_time,
                        &request.creator,
                        Some(&experiment_id),
                        log,
                    )
                    .await?;

                self.registry
                    .update_experiment(&experiment_id, |exp| exp.register_child(&task.simulation_id))?;
                tasks.push(task);
            }
        }

        let container = self.registry.get_experiment(&experiment_id)?;
        Ok((container, tasks))
    }

    /// Create one standalone simulation and dispatch it
    pub async fn create_simulation(&self, request: SimulationRequest) -> Result<Launch> {
        let target_time =
            resolve_target_time(request.target_time, false, self.default_target_time)?;
        if request.name.trim().is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "simulation name must not be empty".into(),
            ));
        }

        let mut log = CreationLog::default();
        let task = match self
            .create_run(
                request.parent_id.as_deref(),
                &request.name,
                request.config.clone(),
                target_time,
                &request.creator,
                None,
                &mut log,
            )
            .await
        {
            Ok(task) => task,
            Err(e) => {
                error!(simulation = %request.name, error = %e, "Simulation creation failed");
                self.rollback(log).await;
                return Err(e);
            }
        };

        let container = self.registry.get_simulation(&task.simulation_id)?;
        let runs = self.dispatch(vec![task]).await;
        Ok(Launch { container, runs })
    }

    /// Container, record and job for one run; the job is created last
    #[allow(clippy::too_many_arguments)]
    async fn create_run(
        &self,
        parent_id: Option<&str>,
        name: &str,
        config: ConcreteConfig,
        target_time: f64,
        creator: &Creator,
        experiment_id: Option<&str>,
        log: &mut CreationLog,
    ) -> Result<RunTask> {
        let folder = self
            .retry
            .run("create_simulation_container", || {
                self.sink.create_container(parent_id, name)
            })
            .await?;
        log.containers.push(folder.id.clone());

        self.registry.insert(Container {
            id: folder.id.clone(),
            parent_id: folder.parent_id.clone(),
            name: folder.name.clone(),
            kind: ContainerKind::Simulation(SimulationRecord::new(
                config.clone(),
                creator,
                target_time,
                experiment_id.map(str::to_string),
            )),
        });
        log.records.push(folder.id.clone());

        let context = JobContext {
            simulation_id: folder.id.clone(),
            experiment_id: experiment_id.map(str::to_string),
        };
        let job = self
            .retry
            .run("create_job", || {
                self.jobs.create_job(&folder.name, context.clone(), target_time)
            })
            .await?;
        log.jobs.push(job.id.clone());

        self.registry
            .update_simulation(&folder.id, |sim| sim.job_id = Some(job.id.clone()))?;
        debug!(simulation_id = %folder.id, job_id = %job.id, "Created run {}", folder.name);

        Ok(RunTask {
            simulation_id: folder.id,
            job_id: job.id,
            name: folder.name,
            config,
            target_time,
        })
    }

    /// Remove everything in `log`, newest first, best-effort
    async fn rollback(&self, log: CreationLog) {
        warn!(
            containers = log.containers.len(),
            jobs = log.jobs.len(),
            "Rolling back partial creation"
        );

        for job_id in log.jobs.iter().rev() {
            if let Err(e) = self.jobs.remove_job(job_id).await {
                warn!(job_id = %job_id, error = %e, "Could not remove job during rollback");
            }
        }

        for record_id in log.records.iter().rev() {
            self.registry.remove(record_id);
        }

        if let Some(experiment_id) = &log.experiment {
            self.propagator.close_experiment(experiment_id);
        }

        for container_id in log.containers.iter().rev() {
            match self.sink.remove_container(container_id).await {
                Ok(()) => {}
                // already gone with its parent
                Err(CollaboratorError::NotFound(_)) => {}
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Could not remove container during rollback")
                }
            }
        }
    }

    /// Queue every task's job and hand it to the pool
    async fn dispatch(&self, tasks: Vec<RunTask>) -> Vec<RunHandle> {
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let queued = self
                .retry
                .run("queue_job", || {
                    self.jobs
                        .set_status(&task.job_id, JobStatus::Queued, 0.0, task.target_time)
                })
                .await;

            match queued {
                Ok(()) => {}
                Err(EngineError::AlreadyCanceled(_)) => {
                    info!(job_id = %task.job_id, "Job canceled before dispatch, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(job_id = %task.job_id, error = %e, "Could not mark job queued");
                }
            }

            handles.push(self.pool.submit(task));
        }

        handles
    }

    /// Request cancellation of one simulation's job
    pub async fn cancel_simulation(&self, simulation_id: &str) -> Result<()> {
        let container = self.registry.get_simulation(simulation_id)?;
        let job_id = container
            .as_simulation()
            .and_then(|sim| sim.job_id.clone())
            .ok_or_else(|| EngineError::NotFound(format!("job of simulation {}", simulation_id)))?;

        self.retry
            .run("cancel_job", || self.jobs.cancel(&job_id))
            .await?;
        info!(simulation_id = simulation_id, job_id = %job_id, "Cancellation requested");
        Ok(())
    }

    /// Cancel every still-active child; failures do not stop the rest
    pub async fn cancel_experiment(&self, experiment_id: &str) -> Result<CancelReport> {
        let children = self.registry.children_of(experiment_id)?;
        let mut report = CancelReport::default();

        for child in children {
            let terminal = child
                .as_simulation()
                .map(|sim| sim.status.is_terminal())
                .unwrap_or(false);
            if terminal {
                report.skipped.push(child.id);
                continue;
            }

            match self.cancel_simulation(&child.id).await {
                Ok(()) => report.canceled.push(child.id),
                Err(e) => {
                    warn!(simulation_id = %child.id, error = %e, "Could not cancel child");
                    report.failed.push((child.id, e.to_string()));
                }
            }
        }

        info!(
            experiment_id = experiment_id,
            canceled = report.canceled.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Experiment cancel finished"
        );
        Ok(report)
    }
}
