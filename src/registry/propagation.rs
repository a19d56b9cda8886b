// src/registry/propagation.rs
//! Job update propagation
//!
//! Subscribed to the job backend, the propagator mirrors every job update
//! onto its simulation record and, for experiment children, onto the parent
//! experiment's aggregate.
//!
//! ```text
//! JobBackend ──event──► StatusPropagator ──► simulation record
//!                              │
//!                              └──► experiment queue ──► worker ──► experiment record
//!                                   (one per experiment)   (single writer)
//! ```
//!
//! Each experiment has exactly one worker applying updates to its per-child
//! maps, so concurrent children never overwrite each other's entries. The
//! event handler waits for the worker's acknowledgement before returning.
//!
//! Once an experiment's aggregate turns terminal the worker drops its queue
//! and exits after draining. A late update opens a fresh queue.

use crate::model::records::JobRecord;
use crate::model::status::{simulation_progress, JobStatus};
use crate::registry::store::Registry;
use crate::runtime::collaborators::JobEventHandler;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

struct ChildUpdate {
    simulation_id: String,
    progress: f64,
    status: JobStatus,
    ack: oneshot::Sender<()>,
}

struct UpdateQueue {
    generation: u64,
    tx: mpsc::UnboundedSender<ChildUpdate>,
}

type QueueMap = Arc<DashMap<String, UpdateQueue>>;

/// Routes job updates into the registry
pub struct StatusPropagator {
    registry: Arc<Registry>,
    queues: QueueMap,
    generations: AtomicU64,
}

impl StatusPropagator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            queues: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Drop an experiment's queue; its worker exits once drained
    pub fn close_experiment(&self, experiment_id: &str) {
        if self.queues.remove(experiment_id).is_some() {
            debug!(experiment_id = experiment_id, "Closed experiment update queue");
            metrics::gauge!("orchestrator_open_experiment_queues").set(self.queues.len() as f64);
        }
    }

    pub fn open_queues(&self) -> usize {
        self.queues.len()
    }

    fn queue_for(&self, experiment_id: &str) -> mpsc::UnboundedSender<ChildUpdate> {
        let tx = self
            .queues
            .entry(experiment_id.to_string())
            .or_insert_with(|| {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                UpdateQueue {
                    generation,
                    tx: spawn_worker(
                        Arc::clone(&self.registry),
                        Arc::clone(&self.queues),
                        experiment_id.to_string(),
                        generation,
                    ),
                }
            })
            .tx
            .clone();
        metrics::gauge!("orchestrator_open_experiment_queues").set(self.queues.len() as f64);
        tx
    }

    async fn propagate_to_experiment(
        &self,
        experiment_id: &str,
        simulation_id: &str,
        progress: f64,
        status: JobStatus,
    ) {
        let (ack, done) = oneshot::channel();
        let update = ChildUpdate {
            simulation_id: simulation_id.to_string(),
            progress,
            status,
            ack,
        };

        if self.queue_for(experiment_id).send(update).is_err() {
            warn!(experiment_id = experiment_id, "Experiment update queue is closed");
            return;
        }

        if done.await.is_err() {
            warn!(experiment_id = experiment_id, "Experiment update was dropped");
        }
    }
}

fn spawn_worker(
    registry: Arc<Registry>,
    queues: QueueMap,
    experiment_id: String,
    generation: u64,
) -> mpsc::UnboundedSender<ChildUpdate> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ChildUpdate>();
    debug!(experiment_id = %experiment_id, generation = generation, "Starting experiment update worker");

    tokio::spawn(async move {
        // Senders still held by in-flight updates keep the loop alive after
        // the queue is dropped from the map.
        while let Some(update) = rx.recv().await {
            let result = registry.update_experiment(&experiment_id, |exp| {
                let before = exp.status;
                exp.apply_child_update(&update.simulation_id, update.progress, update.status);
                (before, exp.status, exp.progress)
            });

            match result {
                Ok((before, status, progress)) => {
                    trace!(
                        experiment_id = %experiment_id,
                        status = %status,
                        progress = progress,
                        "Experiment aggregate recomputed"
                    );
                    if status.is_terminal() {
                        if !before.is_terminal() {
                            info!(experiment_id = %experiment_id, status = %status, "Experiment finished");
                            metrics::counter!("orchestrator_experiments_finished_total", "status" => status.as_str())
                                .increment(1);
                        }
                        if queues
                            .remove_if(&experiment_id, |_, queue| queue.generation == generation)
                            .is_some()
                        {
                            debug!(experiment_id = %experiment_id, "Closed experiment update queue");
                            metrics::gauge!("orchestrator_open_experiment_queues")
                                .set(queues.len() as f64);
                        }
                    }
                }
                Err(e) => warn!(experiment_id = %experiment_id, error = %e, "Dropping child update"),
            }

            let _ = update.ack.send(());
        }
        debug!(experiment_id = %experiment_id, "Experiment update worker stopped");
    });

    tx
}

#[async_trait]
impl JobEventHandler for StatusPropagator {
    async fn on_job_update(&self, job: JobRecord) {
        let progress = simulation_progress(job.progress.current, job.progress.total);
        let simulation_id = &job.context.simulation_id;

        let applied = self.registry.update_simulation(simulation_id, |sim| {
            sim.status = job.status;
            sim.progress = progress;
        });
        if let Err(e) = applied {
            debug!(job_id = %job.id, error = %e, "Update for unknown simulation");
            return;
        }

        if let Some(experiment_id) = &job.context.experiment_id {
            self.propagate_to_experiment(experiment_id, simulation_id, progress, job.status)
                .await;
        }
    }
}
