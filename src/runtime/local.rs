// src/runtime/local.rs
//! In-process collaborators
//!
//! Used by the command-line runner and by tests:
//!
//! - **LocalArtifactSink**: containers and file contents kept in memory,
//!   renames on sibling name conflicts (`name (1)`, `name (2)`, …)
//! - **LocalJobBackend**: job table with update events delivered to
//!   subscribers in the order the updates were applied
//! - **LinearEngine**: reference engine advancing time in fixed steps

use crate::model::document::ConcreteConfig;
use crate::model::records::{JobContext, JobRecord};
use crate::model::status::{JobProgress, JobStatus};
use crate::runtime::collaborators::{
    ArtifactSink, CallResult, ContainerInfo, JobBackend, JobEventHandler,
};
use crate::runtime::engine::{EngineState, Phase, SimulationEngine, StateStream};
use crate::utils::errors::{CollaboratorError, EngineError, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use ulid::Ulid;

struct StoredContainer {
    info: ContainerInfo,
    contents: IndexMap<String, Vec<u8>>,
}

/// In-memory artifact sink
#[derive(Default)]
pub struct LocalArtifactSink {
    containers: DashMap<String, StoredContainer>,

    /// Serializes name allocation so concurrent creates cannot collide
    naming: Mutex<()>,
}

impl LocalArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of an uploaded file
    pub fn file_contents(&self, id: &str, file_name: &str) -> Option<Vec<u8>> {
        self.containers
            .get(id)
            .and_then(|c| c.contents.get(file_name).cloned())
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    fn sibling_names(&self, parent_id: Option<&str>) -> HashSet<String> {
        self.containers
            .iter()
            .filter(|c| c.info.parent_id.as_deref() == parent_id)
            .map(|c| c.info.name.clone())
            .collect()
    }

    fn not_found(id: &str) -> CollaboratorError {
        CollaboratorError::NotFound(format!("container {}", id))
    }
}

#[async_trait]
impl ArtifactSink for LocalArtifactSink {
    async fn create_container(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> CallResult<ContainerInfo> {
        let _naming = self.naming.lock();

        if let Some(parent) = parent_id {
            if !self.containers.contains_key(parent) {
                return Err(Self::not_found(parent));
            }
        }

        let taken = self.sibling_names(parent_id);
        let mut final_name = name.to_string();
        let mut suffix = 1;
        while taken.contains(&final_name) {
            final_name = format!("{} ({})", name, suffix);
            suffix += 1;
        }

        let info = ContainerInfo {
            id: Ulid::new().to_string(),
            parent_id: parent_id.map(str::to_string),
            name: final_name,
            metadata: Map::new(),
            files: Vec::new(),
        };
        trace!("Created container {} ({})", info.name, info.id);

        self.containers.insert(
            info.id.clone(),
            StoredContainer {
                info: info.clone(),
                contents: IndexMap::new(),
            },
        );
        Ok(info)
    }

    async fn set_metadata(&self, id: &str, metadata: Map<String, Value>) -> CallResult<()> {
        let mut container = self.containers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        container.info.metadata.extend(metadata);
        Ok(())
    }

    async fn upload_file(&self, id: &str, path: &Path) -> CallResult<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CollaboratorError::Other(format!("not a file: {}", path.display())))?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CollaboratorError::Other(format!("reading {}: {}", path.display(), e)))?;

        let mut container = self.containers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if !container.info.files.contains(&file_name) {
            container.info.files.push(file_name.clone());
        }
        container.contents.insert(file_name, bytes);
        Ok(())
    }

    async fn get_container(&self, id: &str) -> CallResult<ContainerInfo> {
        self.containers
            .get(id)
            .map(|c| c.info.clone())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn list_containers(&self, parent_id: &str) -> CallResult<Vec<ContainerInfo>> {
        if !self.containers.contains_key(parent_id) {
            return Err(Self::not_found(parent_id));
        }

        let mut children: Vec<ContainerInfo> = self
            .containers
            .iter()
            .filter(|c| c.info.parent_id.as_deref() == Some(parent_id))
            .map(|c| c.info.clone())
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn remove_container(&self, id: &str) -> CallResult<()> {
        let mut pending = vec![id.to_string()];
        let mut removed = 0;

        while let Some(current) = pending.pop() {
            pending.extend(
                self.containers
                    .iter()
                    .filter(|c| c.info.parent_id.as_deref() == Some(current.as_str()))
                    .map(|c| c.info.id.clone())
                    .collect::<Vec<_>>(),
            );
            if self.containers.remove(&current).is_some() {
                removed += 1;
            }
        }

        if removed == 0 {
            return Err(Self::not_found(id));
        }
        debug!("Removed {} containers under {}", removed, id);
        Ok(())
    }
}

/// In-memory task backend
pub struct LocalJobBackend {
    jobs: DashMap<String, JobRecord>,
    handlers: RwLock<Vec<Arc<dyn JobEventHandler>>>,

    /// Held while applying an update and notifying subscribers, so events
    /// are observed in the order updates were applied
    dispatch: tokio::sync::Mutex<()>,
}

impl Default for LocalJobBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalJobBackend {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            handlers: RwLock::new(Vec::new()),
            dispatch: tokio::sync::Mutex::new(()),
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    async fn notify(&self, job: JobRecord) {
        let handlers: Vec<Arc<dyn JobEventHandler>> = self.handlers.read().clone();
        for handler in handlers {
            handler.on_job_update(job.clone()).await;
        }
    }

    fn not_found(id: &str) -> CollaboratorError {
        CollaboratorError::NotFound(format!("job {}", id))
    }
}

#[async_trait]
impl JobBackend for LocalJobBackend {
    async fn create_job(
        &self,
        title: &str,
        context: JobContext,
        total: f64,
    ) -> CallResult<JobRecord> {
        let job = JobRecord {
            id: Ulid::new().to_string(),
            title: title.to_string(),
            status: JobStatus::Inactive,
            progress: JobProgress::new(0.0, total),
            context,
            created_at: Utc::now(),
        };
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn set_status(
        &self,
        job_id: &str,
        status: JobStatus,
        current: f64,
        total: f64,
    ) -> CallResult<()> {
        let _dispatch = self.dispatch.lock().await;

        let snapshot = {
            let mut job = self.jobs.get_mut(job_id).ok_or_else(|| Self::not_found(job_id))?;
            if job.status == JobStatus::Canceled {
                return Err(CollaboratorError::AlreadyCanceled(job_id.to_string()));
            }
            job.status = status;
            job.progress = JobProgress::new(current, total);
            job.clone()
        };

        trace!(job_id = job_id, code = status.code(), current = current, "Job status {}", status);

        self.notify(snapshot).await;
        Ok(())
    }

    async fn get_status(&self, job_id: &str) -> CallResult<JobStatus> {
        self.jobs
            .get(job_id)
            .map(|job| job.status)
            .ok_or_else(|| Self::not_found(job_id))
    }

    async fn get_job(&self, job_id: &str) -> CallResult<JobRecord> {
        self.jobs
            .get(job_id)
            .map(|job| job.clone())
            .ok_or_else(|| Self::not_found(job_id))
    }

    async fn cancel(&self, job_id: &str) -> CallResult<()> {
        let _dispatch = self.dispatch.lock().await;

        let snapshot = {
            let mut job = self.jobs.get_mut(job_id).ok_or_else(|| Self::not_found(job_id))?;
            if job.status.is_terminal() {
                return Ok(());
            }
            job.status = JobStatus::Canceled;
            job.clone()
        };

        debug!(job_id = job_id, "Job canceled");
        self.notify(snapshot).await;
        Ok(())
    }

    async fn remove_job(&self, job_id: &str) -> CallResult<()> {
        self.jobs
            .remove(job_id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(job_id))
    }

    fn subscribe(&self, handler: Arc<dyn JobEventHandler>) {
        self.handlers.write().push(handler);
    }
}

/// State produced by [`LinearEngine`]
#[derive(Debug, Clone, Serialize)]
pub struct LinearState {
    pub time: f64,
    pub step: u64,

    /// Numeric configuration parameters, `module → parameter → value`
    pub values: BTreeMap<String, BTreeMap<String, f64>>,
}

impl EngineState for LinearState {
    fn time(&self) -> f64 {
        self.time
    }
}

/// Reference engine: advances time by a fixed step until the target
///
/// The step can be overridden per run with `simulation.time_step`. Summary
/// statistics grow every numeric parameter linearly with time.
#[derive(Debug, Clone)]
pub struct LinearEngine {
    time_step: f64,
    step_delay: Option<Duration>,
    fail_at: Option<f64>,
}

impl LinearEngine {
    pub fn new(time_step: f64) -> Self {
        Self {
            time_step,
            step_delay: None,
            fail_at: None,
        }
    }

    /// Sleep before producing every state
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    /// Fail instead of producing the first state at or after `time`
    pub fn failing_at(mut self, time: f64) -> Self {
        self.fail_at = Some(time);
        self
    }

    fn numeric_values(config: &ConcreteConfig) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut values: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for (module, params) in &config.modules {
            for (param, value) in params {
                if let Some(number) = value.as_f64() {
                    values
                        .entry(module.clone())
                        .or_default()
                        .insert(param.clone(), number);
                }
            }
        }
        values
    }
}

#[async_trait]
impl SimulationEngine for LinearEngine {
    type State = LinearState;

    fn start(&self, config: &ConcreteConfig, target_time: f64) -> Result<StateStream<LinearState>> {
        let time_step = config
            .get("simulation", "time_step")
            .and_then(|v| v.as_f64())
            .unwrap_or(self.time_step);
        if !(time_step > 0.0) {
            return Err(EngineError::InvalidConfiguration(format!(
                "time step must be positive, got {}",
                time_step
            )));
        }

        let values = Self::numeric_values(config);
        let step_delay = self.step_delay;
        let fail_at = self.fail_at;

        let stream = futures::stream::unfold((0u64, false), move |(step, done)| {
            let values = values.clone();
            async move {
                if done {
                    return None;
                }
                if let Some(delay) = step_delay {
                    tokio::time::sleep(delay).await;
                }

                let next = step + 1;
                let time = (next as f64 * time_step).min(target_time);

                if let Some(limit) = fail_at {
                    if time >= limit {
                        let err = EngineError::ExecutionError(format!(
                            "engine failure at time {}",
                            time
                        ));
                        return Some((Err(err), (next, true)));
                    }
                }

                let phase = if time >= target_time {
                    Phase::Final
                } else {
                    Phase::Step
                };
                let state = LinearState {
                    time,
                    step: next,
                    values,
                };
                Some((Ok((state, phase)), (next, phase == Phase::Final)))
            }
        });

        Ok(stream.boxed())
    }

    async fn render(&self, state: &LinearState, destination: &Path) -> Result<()> {
        let path = destination.join(format!("state-{:04}.json", state.step));
        tokio::fs::write(&path, serde_json::to_vec_pretty(state)?).await?;
        Ok(())
    }

    fn summary_statistics(&self, state: &LinearState) -> Value {
        let mut stats = Map::new();
        stats.insert("step".to_string(), json!(state.step));

        for (module, params) in &state.values {
            let scaled: Map<String, Value> = params
                .iter()
                .map(|(param, value)| (param.clone(), json!(value * (1.0 + state.time))))
                .collect();
            stats.insert(module.clone(), Value::Object(scaled));
        }

        Value::Object(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::document::Scalar;

    #[tokio::test]
    async fn test_sink_renames_on_conflict() {
        let sink = LocalArtifactSink::new();
        let root = sink.create_container(None, "root").await.unwrap();

        let a = sink.create_container(Some(&root.id), "run").await.unwrap();
        let b = sink.create_container(Some(&root.id), "run").await.unwrap();
        let c = sink.create_container(Some(&root.id), "run").await.unwrap();

        assert_eq!(a.name, "run");
        assert_eq!(b.name, "run (1)");
        assert_eq!(c.name, "run (2)");
    }

    #[tokio::test]
    async fn test_sink_remove_is_recursive() {
        let sink = LocalArtifactSink::new();
        let root = sink.create_container(None, "root").await.unwrap();
        let child = sink.create_container(Some(&root.id), "child").await.unwrap();
        sink.create_container(Some(&child.id), "grandchild").await.unwrap();

        sink.remove_container(&root.id).await.unwrap();
        assert_eq!(sink.container_count(), 0);
        assert!(sink.get_container(&child.id).await.is_err());
    }

    #[tokio::test]
    async fn test_sink_missing_parent() {
        let sink = LocalArtifactSink::new();
        let result = sink.create_container(Some("missing"), "x").await;
        assert!(matches!(result, Err(CollaboratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_backend_rejects_updates_after_cancel() {
        let backend = LocalJobBackend::new();
        let job = backend
            .create_job(
                "job",
                JobContext {
                    simulation_id: "s".into(),
                    experiment_id: None,
                },
                10.0,
            )
            .await
            .unwrap();

        backend
            .set_status(&job.id, JobStatus::Running, 1.0, 10.0)
            .await
            .unwrap();
        backend.cancel(&job.id).await.unwrap();

        let result = backend.set_status(&job.id, JobStatus::Success, 10.0, 10.0).await;
        assert!(matches!(result, Err(CollaboratorError::AlreadyCanceled(_))));
        assert_eq!(backend.get_status(&job.id).await.unwrap(), JobStatus::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_finished_job_is_noop() {
        let backend = LocalJobBackend::new();
        let job = backend
            .create_job(
                "job",
                JobContext {
                    simulation_id: "s".into(),
                    experiment_id: None,
                },
                1.0,
            )
            .await
            .unwrap();
        backend
            .set_status(&job.id, JobStatus::Success, 1.0, 1.0)
            .await
            .unwrap();

        backend.cancel(&job.id).await.unwrap();
        assert_eq!(backend.get_status(&job.id).await.unwrap(), JobStatus::Success);
    }

    #[tokio::test]
    async fn test_linear_engine_stream() {
        let engine = LinearEngine::new(2.0);
        let mut config = ConcreteConfig::default();
        config.set("fungus", "count", Scalar::Int(3));

        let states: Vec<_> = engine
            .start(&config, 5.0)
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
            .await;

        let times: Vec<f64> = states.iter().map(|(s, _)| s.time).collect();
        assert_eq!(times, vec![2.0, 4.0, 5.0]);
        assert_eq!(states.last().unwrap().1, Phase::Final);

        let stats = engine.summary_statistics(&states[0].0);
        assert_eq!(stats["fungus"]["count"], 9.0);
        assert_eq!(stats["step"], 1);
    }

    #[tokio::test]
    async fn test_time_step_override() {
        let engine = LinearEngine::new(1.0);
        let mut config = ConcreteConfig::default();
        config.set("simulation", "time_step", Scalar::Float(0.5));

        let count = engine.start(&config, 2.0).unwrap().count().await;
        assert_eq!(count, 4);
    }
}
