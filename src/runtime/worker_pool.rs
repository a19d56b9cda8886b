// src/runtime/worker_pool.rs
//! Bounded worker pool for simulation runs
//!
//! Runs are submitted without blocking the caller. Each submitted run becomes
//! a tokio task that first waits for a permit, so at most `max_concurrent`
//! runs execute at once and the rest queue in submission order.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//! ├─ Semaphore(max_concurrent)   (fair, FIFO permits)
//! ├─ Running: [run1, run2, ...]  (holding a permit)
//! └─ Waiting: [run3, run4, ...]  (spawned, waiting for a permit)
//! ```

use crate::runtime::engine::SimulationEngine;
use crate::runtime::executor::{RunExecutor, RunOutcome, RunTask};
use crate::utils::errors::{EngineError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum runs executing at once (default: 4)
    pub max_concurrent: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

#[derive(Default)]
struct Counters {
    waiting: AtomicUsize,
    running: AtomicUsize,
    finished: AtomicUsize,
}

/// Pool executing [`RunTask`]s on a shared [`RunExecutor`]
pub struct WorkerPool<E: SimulationEngine> {
    config: WorkerPoolConfig,
    executor: RunExecutor<E>,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl<E: SimulationEngine> WorkerPool<E> {
    pub fn new(executor: RunExecutor<E>, config: WorkerPoolConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        info!("Initializing worker pool with {} slots", max_concurrent);

        Self {
            config: WorkerPoolConfig { max_concurrent },
            executor,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Queue a run; returns immediately
    pub fn submit(&self, task: RunTask) -> RunHandle {
        let simulation_id = task.simulation_id.clone();
        let job_id = task.job_id.clone();

        let executor = self.executor.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let counters = Arc::clone(&self.counters);
        counters.waiting.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            counters.waiting.fetch_sub(1, Ordering::SeqCst);

            let _permit = permit.map_err(|_| {
                EngineError::ExecutionError("worker pool is shut down".to_string())
            })?;

            counters.running.fetch_add(1, Ordering::SeqCst);
            debug!(job_id = %task.job_id, "Acquired worker slot");

            let result = executor.run(task).await;

            counters.running.fetch_sub(1, Ordering::SeqCst);
            counters.finished.fetch_add(1, Ordering::SeqCst);
            result
        });

        RunHandle {
            simulation_id,
            job_id,
            handle,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_concurrent: self.config.max_concurrent,
            available_slots: self.semaphore.available_permits(),
            waiting: self.counters.waiting.load(Ordering::SeqCst),
            running: self.counters.running.load(Ordering::SeqCst),
            finished: self.counters.finished.load(Ordering::SeqCst),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub max_concurrent: usize,
    pub available_slots: usize,
    pub waiting: usize,
    pub running: usize,
    pub finished: usize,
}

/// Handle on a submitted run
#[derive(Debug)]
pub struct RunHandle {
    pub simulation_id: String,
    pub job_id: String,
    handle: JoinHandle<Result<RunOutcome>>,
}

impl RunHandle {
    /// Wait for the run to end
    pub async fn wait(self) -> Result<RunOutcome> {
        self.handle
            .await
            .map_err(|e| EngineError::ExecutionError(format!("run task aborted: {}", e)))?
    }
}
