// src/runtime/executor.rs
//! Drives one simulation run to completion
//!
//! # Lifecycle
//!
//! ```text
//! INITIALIZING ──► RUNNING ──► advance ──┬──► FINALIZING ──► SUCCESS
//!      │              ▲                  │
//!      │              └── checkpoint ◄───┘   (every `visualization_interval`)
//!      │
//!      ├── already canceled ───────────────────────────────► CANCELED
//!      └── any failure ──► best-effort ERROR status ───────► error returned
//! ```
//!
//! # Ordering
//!
//! For one checkpoint the artifact upload always completes before the
//! `RUNNING at time T` status update, so an observer that sees the status can
//! fetch the artifacts.
//!
//! Cancellation is cooperative: the job is polled before every
//! `cancel_poll_every`-th advance, never preempting an engine step.

use crate::model::document::ConcreteConfig;
use crate::model::status::JobStatus;
use crate::runtime::collaborators::{ArtifactSink, JobBackend, SimulationCompleter};
use crate::runtime::engine::{EngineState, Phase, SimulationEngine};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use crate::utils::retry::RetryPolicy;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Simulated time between checkpoints (default: 30)
    pub visualization_interval: f64,

    /// Poll for cancellation every N advances (default: 1)
    pub cancel_poll_every: u32,

    /// File name of the uploaded concrete configuration
    pub config_file_name: String,

    /// Retry policy for sink and backend calls
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            visualization_interval: 30.0,
            cancel_poll_every: 1,
            config_file_name: "config.json".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&EngineConfig> for ExecutorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            visualization_interval: config.runtime.visualization_interval,
            cancel_poll_every: config.runtime.cancel_poll_every.max(1),
            config_file_name: config.storage.config_file_name.clone(),
            retry: config.retry.policy(),
        }
    }
}

/// Everything needed to execute one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTask {
    /// Simulation record id (also its artifact container id)
    pub simulation_id: String,

    pub job_id: String,
    pub name: String,
    pub config: ConcreteConfig,
    pub target_time: f64,
}

/// How a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Canceled,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Canceled => "canceled",
        }
    }
}

/// Run executor bound to an engine and the external collaborators
pub struct RunExecutor<E: SimulationEngine> {
    engine: Arc<E>,
    sink: Arc<dyn ArtifactSink>,
    jobs: Arc<dyn JobBackend>,
    completer: Arc<dyn SimulationCompleter>,
    config: ExecutorConfig,
}

impl<E: SimulationEngine> Clone for RunExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            sink: Arc::clone(&self.sink),
            jobs: Arc::clone(&self.jobs),
            completer: Arc::clone(&self.completer),
            config: self.config.clone(),
        }
    }
}

impl<E: SimulationEngine> RunExecutor<E> {
    pub fn new(
        engine: Arc<E>,
        sink: Arc<dyn ArtifactSink>,
        jobs: Arc<dyn JobBackend>,
        completer: Arc<dyn SimulationCompleter>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            engine,
            sink,
            jobs,
            completer,
            config,
        }
    }

    /// Execute `task` until it completes, is canceled or fails
    pub async fn run(&self, task: RunTask) -> Result<RunOutcome> {
        info!(
            simulation_id = %task.simulation_id,
            job_id = %task.job_id,
            target_time = task.target_time,
            "Starting run {}",
            task.name
        );
        metrics::counter!("orchestrator_runs_started_total").increment(1);

        let mut last_time = 0.0;
        let result = self.execute(&task, &mut last_time).await;

        let result = match result {
            Err(e) if e.is_already_canceled() => {
                info!(job_id = %task.job_id, "Run canceled during a status update");
                Ok(RunOutcome::Canceled)
            }
            Err(e) => {
                error!(job_id = %task.job_id, error = %e, "Run failed at time {}", last_time);
                if let Err(status_err) = self
                    .set_status(&task.job_id, JobStatus::Error, last_time, task.target_time)
                    .await
                {
                    error!(
                        job_id = %task.job_id,
                        error = %status_err,
                        "Could not set error status"
                    );
                }
                Err(e)
            }
            ok => ok,
        };

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "error",
        };
        metrics::counter!("orchestrator_runs_finished_total", "outcome" => outcome).increment(1);

        result
    }

    async fn execute(&self, task: &RunTask, last_time: &mut f64) -> Result<RunOutcome> {
        self.initialize(task).await?;

        let mut states = self.engine.start(&task.config, task.target_time)?;
        let mut last_checkpoint = f64::NEG_INFINITY;
        let mut checkpoint_index: u32 = 0;
        let mut advances: u64 = 0;

        loop {
            if advances % u64::from(self.config.cancel_poll_every) == 0
                && self.is_canceled(&task.job_id).await?
            {
                info!(job_id = %task.job_id, "Cancellation observed at time {}", last_time);
                return Ok(RunOutcome::Canceled);
            }

            let next = states.next().await;
            advances += 1;

            let (state, phase) = match next {
                Some(item) => item?,
                None => break,
            };

            let time = state.time();
            *last_time = time;

            if time - last_checkpoint >= self.config.visualization_interval {
                last_checkpoint = time;
                debug!(simulation_id = %task.simulation_id, "Simulation time {}", time);

                self.checkpoint(task, &state, phase, checkpoint_index).await?;
                checkpoint_index += 1;

                self.set_status(&task.job_id, JobStatus::Running, time, task.target_time)
                    .await?;
            }

            if phase == Phase::Final {
                break;
            }
        }

        self.finalize(task).await?;
        Ok(RunOutcome::Completed)
    }

    /// Register with the sink, upload the configuration, report RUNNING
    async fn initialize(&self, task: &RunTask) -> Result<()> {
        let retry = &self.config.retry;

        let container = retry
            .run("get_container", || self.sink.get_container(&task.simulation_id))
            .await?;

        let staging = tempfile::tempdir()?;
        let config_path = staging.path().join(&self.config.config_file_name);
        tokio::fs::write(&config_path, task.config.to_json_pretty()?).await?;

        retry
            .run("upload_config", || {
                self.sink.upload_file(&container.id, &config_path)
            })
            .await?;

        self.set_status(&task.job_id, JobStatus::Running, 0.0, task.target_time)
            .await
    }

    /// Render, summarize and upload one checkpoint
    async fn checkpoint(
        &self,
        task: &RunTask,
        state: &E::State,
        phase: Phase,
        index: u32,
    ) -> Result<()> {
        let retry = &self.config.retry;
        let time = state.time();

        let staging = tempfile::tempdir()?;
        self.engine.render(state, staging.path()).await?;
        let stats = self.engine.summary_statistics(state);

        let step_name = match phase {
            Phase::Final => "final".to_string(),
            Phase::Step => format!("{:04}", index),
        };
        info!(simulation_id = %task.simulation_id, "Uploading checkpoint {}", step_name);

        let folder = retry
            .run("create_checkpoint", || {
                self.sink
                    .create_container(Some(&task.simulation_id), &step_name)
            })
            .await?;

        let mut metadata = Map::new();
        metadata.insert("time".to_string(), json!(time));
        metadata.insert("stats".to_string(), stats);

        retry
            .run("set_checkpoint_metadata", || {
                self.sink.set_metadata(&folder.id, metadata.clone())
            })
            .await?;

        for path in staged_files(staging.path()).await? {
            retry
                .run("upload_artifact", || self.sink.upload_file(&folder.id, &path))
                .await?;
        }

        metrics::counter!("orchestrator_checkpoints_total").increment(1);
        Ok(())
    }

    async fn finalize(&self, task: &RunTask) -> Result<()> {
        self.config
            .retry
            .run("mark_complete", || {
                self.completer.mark_complete(&task.simulation_id)
            })
            .await?;

        self.set_status(
            &task.job_id,
            JobStatus::Success,
            task.target_time,
            task.target_time,
        )
        .await?;

        info!(simulation_id = %task.simulation_id, "Run {} completed", task.name);
        Ok(())
    }

    async fn is_canceled(&self, job_id: &str) -> Result<bool> {
        let status = self
            .config
            .retry
            .run("get_status", || self.jobs.get_status(job_id))
            .await?;
        Ok(status == JobStatus::Canceled)
    }

    async fn set_status(
        &self,
        job_id: &str,
        status: JobStatus,
        current: f64,
        total: f64,
    ) -> Result<()> {
        let result = self
            .config
            .retry
            .run("set_status", || {
                self.jobs.set_status(job_id, status, current, total)
            })
            .await;

        if let Err(EngineError::AlreadyCanceled(_)) = &result {
            warn!(job_id = job_id, "Status {} rejected, job already canceled", status);
        }
        result
    }
}

/// Files written by the engine's render hook, in name order
async fn staged_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::records::{JobContext, JobRecord};
    use crate::runtime::collaborators::{CallResult, ContainerInfo, JobEventHandler};
    use crate::runtime::local::{LinearEngine, LocalArtifactSink, LocalJobBackend};
    use crate::utils::errors::CollaboratorError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingCompleter {
        completed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SimulationCompleter for RecordingCompleter {
        async fn mark_complete(&self, simulation_id: &str) -> CallResult<()> {
            self.completed.lock().push(simulation_id.to_string());
            Ok(())
        }
    }

    /// Fails the first `failures` uploads with the given error
    struct FlakySink {
        inner: LocalArtifactSink,
        failures: AtomicU32,
        error: CollaboratorError,
    }

    #[async_trait]
    impl ArtifactSink for FlakySink {
        async fn create_container(
            &self,
            parent_id: Option<&str>,
            name: &str,
        ) -> CallResult<ContainerInfo> {
            self.inner.create_container(parent_id, name).await
        }

        async fn set_metadata(&self, id: &str, metadata: Map<String, Value>) -> CallResult<()> {
            self.inner.set_metadata(id, metadata).await
        }

        async fn upload_file(&self, id: &str, path: &Path) -> CallResult<()> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            self.inner.upload_file(id, path).await
        }

        async fn get_container(&self, id: &str) -> CallResult<ContainerInfo> {
            self.inner.get_container(id).await
        }

        async fn list_containers(&self, parent_id: &str) -> CallResult<Vec<ContainerInfo>> {
            self.inner.list_containers(parent_id).await
        }

        async fn remove_container(&self, id: &str) -> CallResult<()> {
            self.inner.remove_container(id).await
        }
    }

    /// Cancels the job right after the `cancel_on`-th poll reported it as live
    struct CancelAfterPoll {
        inner: Arc<LocalJobBackend>,
        polls: AtomicU32,
        cancel_on: u32,
    }

    #[async_trait]
    impl JobBackend for CancelAfterPoll {
        async fn create_job(
            &self,
            title: &str,
            context: JobContext,
            total: f64,
        ) -> CallResult<JobRecord> {
            self.inner.create_job(title, context, total).await
        }

        async fn set_status(
            &self,
            job_id: &str,
            status: JobStatus,
            current: f64,
            total: f64,
        ) -> CallResult<()> {
            self.inner.set_status(job_id, status, current, total).await
        }

        async fn get_status(&self, job_id: &str) -> CallResult<JobStatus> {
            let status = self.inner.get_status(job_id).await?;
            if self.polls.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_on {
                self.inner.cancel(job_id).await?;
            }
            Ok(status)
        }

        async fn get_job(&self, job_id: &str) -> CallResult<JobRecord> {
            self.inner.get_job(job_id).await
        }

        async fn cancel(&self, job_id: &str) -> CallResult<()> {
            self.inner.cancel(job_id).await
        }

        async fn remove_job(&self, job_id: &str) -> CallResult<()> {
            self.inner.remove_job(job_id).await
        }

        fn subscribe(&self, handler: Arc<dyn JobEventHandler>) {
            self.inner.subscribe(handler)
        }
    }

    struct Fixture {
        sink: Arc<dyn ArtifactSink>,
        jobs: Arc<LocalJobBackend>,
        completer: Arc<RecordingCompleter>,
        task: RunTask,
    }

    async fn fixture(sink: Arc<dyn ArtifactSink>, target_time: f64) -> Fixture {
        let jobs = Arc::new(LocalJobBackend::new());
        let folder = sink.create_container(None, "run").await.unwrap();
        let job = jobs
            .create_job(
                "test run",
                JobContext {
                    simulation_id: folder.id.clone(),
                    experiment_id: None,
                },
                target_time,
            )
            .await
            .unwrap();

        Fixture {
            sink,
            jobs,
            completer: Arc::new(RecordingCompleter {
                completed: Mutex::new(Vec::new()),
            }),
            task: RunTask {
                simulation_id: folder.id,
                job_id: job.id,
                name: "run".to_string(),
                config: ConcreteConfig::default(),
                target_time,
            },
        }
    }

    fn executor(fixture: &Fixture, engine: LinearEngine, interval: f64) -> RunExecutor<LinearEngine> {
        RunExecutor::new(
            Arc::new(engine),
            Arc::clone(&fixture.sink),
            fixture.jobs.clone(),
            fixture.completer.clone(),
            ExecutorConfig {
                visualization_interval: interval,
                retry: RetryPolicy::immediate(10),
                ..Default::default()
            },
        )
    }

    async fn checkpoint_times(sink: &Arc<dyn ArtifactSink>, simulation_id: &str) -> Vec<f64> {
        let mut times: Vec<f64> = sink
            .list_containers(simulation_id)
            .await
            .unwrap()
            .iter()
            .filter_map(|c| c.metadata.get("time").and_then(Value::as_f64))
            .collect();
        times.sort_by(f64::total_cmp);
        times
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let fixture = fixture(Arc::new(LocalArtifactSink::new()), 10.0).await;
        let executor = executor(&fixture, LinearEngine::new(1.0), 3.0);

        let outcome = executor.run(fixture.task.clone()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let job = fixture.jobs.get_job(&fixture.task.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.progress.current, 10.0);
        assert_eq!(
            fixture.completer.completed.lock().as_slice(),
            &[fixture.task.simulation_id.clone()]
        );

        let root = fixture.sink.get_container(&fixture.task.simulation_id).await.unwrap();
        assert_eq!(root.files, vec!["config.json".to_string()]);
    }

    #[tokio::test]
    async fn test_checkpoints_are_spaced_by_interval() {
        let fixture = fixture(Arc::new(LocalArtifactSink::new()), 10.0).await;
        let executor = executor(&fixture, LinearEngine::new(1.0), 3.0);
        executor.run(fixture.task.clone()).await.unwrap();

        let times = checkpoint_times(&fixture.sink, &fixture.task.simulation_id).await;
        assert_eq!(times, vec![1.0, 4.0, 7.0, 10.0]);
        for pair in times.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!(pair[1] - pair[0] >= 3.0);
        }

        let names: Vec<String> = fixture
            .sink
            .list_containers(&fixture.task.simulation_id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(names.contains(&"0000".to_string()));
        assert!(names.contains(&"final".to_string()));
    }

    #[tokio::test]
    async fn test_canceled_before_start_returns_without_error() {
        let fixture = fixture(Arc::new(LocalArtifactSink::new()), 10.0).await;
        fixture.jobs.cancel(&fixture.task.job_id).await.unwrap();

        let executor = executor(&fixture, LinearEngine::new(1.0), 3.0);
        let outcome = executor.run(fixture.task.clone()).await.unwrap();

        assert_eq!(outcome, RunOutcome::Canceled);
        let status = fixture.jobs.get_status(&fixture.task.job_id).await.unwrap();
        assert_eq!(status, JobStatus::Canceled);
        assert!(fixture.completer.completed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_run_never_regresses() {
        let fixture = fixture(Arc::new(LocalArtifactSink::new()), 100.0).await;
        let engine = LinearEngine::new(1.0).with_step_delay(std::time::Duration::from_millis(2));
        let executor = executor(&fixture, engine, 1.0);

        let task = fixture.task.clone();
        let handle = tokio::spawn(async move { executor.run(task).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        fixture.jobs.cancel(&fixture.task.job_id).await.unwrap();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, RunOutcome::Canceled);

        let job = fixture.jobs.get_job(&fixture.task.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.progress.current < 100.0);
        assert!(fixture.completer.completed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_poll_and_status_update() {
        let fixture = fixture(Arc::new(LocalArtifactSink::new()), 10.0).await;
        let jobs = Arc::new(CancelAfterPoll {
            inner: Arc::clone(&fixture.jobs),
            polls: AtomicU32::new(0),
            cancel_on: 2,
        });
        let executor = RunExecutor::new(
            Arc::new(LinearEngine::new(1.0)),
            Arc::clone(&fixture.sink),
            jobs.clone(),
            fixture.completer.clone(),
            ExecutorConfig {
                visualization_interval: 1.0,
                retry: RetryPolicy::immediate(10),
                ..Default::default()
            },
        );

        let outcome = executor.run(fixture.task.clone()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Canceled);

        // the rejected checkpoint status ended the run, no further poll
        assert_eq!(jobs.polls.load(Ordering::SeqCst), 2);

        let job = fixture.jobs.get_job(&fixture.task.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
        assert_eq!(job.progress.current, 1.0);
        assert!(fixture.completer.completed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_transient_upload_failures_are_retried() {
        let sink = Arc::new(FlakySink {
            inner: LocalArtifactSink::new(),
            failures: AtomicU32::new(3),
            error: CollaboratorError::status(429, "rate limited"),
        });
        let fixture = fixture(sink, 5.0).await;
        let executor = executor(&fixture, LinearEngine::new(1.0), 10.0);

        let outcome = executor.run(fixture.task.clone()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_permanent_failure_sets_error_status() {
        let sink = Arc::new(FlakySink {
            inner: LocalArtifactSink::new(),
            failures: AtomicU32::new(100),
            error: CollaboratorError::status(403, "forbidden"),
        });
        let fixture = fixture(sink, 5.0).await;
        let executor = executor(&fixture, LinearEngine::new(1.0), 10.0);

        let result = executor.run(fixture.task.clone()).await;
        assert!(matches!(result, Err(EngineError::Collaborator { .. })));

        let status = fixture.jobs.get_status(&fixture.task.job_id).await.unwrap();
        assert_eq!(status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_engine_failure_reports_last_time() {
        let fixture = fixture(Arc::new(LocalArtifactSink::new()), 10.0).await;
        let engine = LinearEngine::new(1.0).failing_at(4.0);
        let executor = executor(&fixture, engine, 100.0);

        let result = executor.run(fixture.task.clone()).await;
        assert!(matches!(result, Err(EngineError::ExecutionError(_))));

        let job = fixture.jobs.get_job(&fixture.task.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.progress.current, 3.0);
    }
}
