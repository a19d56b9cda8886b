// src/model/status.rs
//! Job status model
//!
//! One state set is shared by jobs, simulations and experiments. A
//! simulation mirrors its job; an experiment is derived from the multiset of
//! its children's statuses with a fixed precedence:
//!
//! ```text
//! ERROR > CANCELED > INACTIVE > QUEUED > RUNNING > SUCCESS
//! ```
//!
//! The first status present in that order wins, so a single failed child
//! fails the experiment and it only succeeds once every child has.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution status of a job, simulation or experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Inactive,
    Queued,
    Running,
    Success,
    Error,
    Canceled,
}

impl JobStatus {
    /// Precedence order used by [`aggregate_status`], strongest first
    pub const PRECEDENCE: [JobStatus; 6] = [
        JobStatus::Error,
        JobStatus::Canceled,
        JobStatus::Inactive,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Success,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error | JobStatus::Canceled)
    }

    /// Numeric code used by task backends
    pub fn code(self) -> u8 {
        match self {
            JobStatus::Inactive => 0,
            JobStatus::Queued => 1,
            JobStatus::Running => 2,
            JobStatus::Success => 3,
            JobStatus::Error => 4,
            JobStatus::Canceled => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Inactive => "INACTIVE",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Error => "ERROR",
            JobStatus::Canceled => "CANCELED",
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Inactive
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job progress in simulation-time units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current: f64,
    pub total: f64,
}

impl JobProgress {
    pub fn new(current: f64, total: f64) -> Self {
        Self { current, total }
    }

    /// Percentage in `[0, 100]`
    pub fn percent(&self) -> f64 {
        simulation_progress(self.current, self.total)
    }
}

/// Simulation progress from a job's `(current, total)` pair
///
/// A non-positive total reports 0 instead of dividing by zero.
pub fn simulation_progress(current: f64, total: f64) -> f64 {
    if !(total > 0.0) || !current.is_finite() {
        return 0.0;
    }
    (100.0 * current / total).clamp(0.0, 100.0)
}

/// Experiment status from its children's statuses
///
/// With no children yet the experiment is `Inactive`.
pub fn aggregate_status<I>(children: I) -> JobStatus
where
    I: IntoIterator<Item = JobStatus>,
{
    let mut seen = [false; 6];
    let mut any = false;

    for status in children {
        any = true;
        if let Some(idx) = JobStatus::PRECEDENCE.iter().position(|s| *s == status) {
            seen[idx] = true;
        }
    }

    if !any {
        return JobStatus::Inactive;
    }

    JobStatus::PRECEDENCE
        .iter()
        .zip(seen.iter())
        .find(|(_, present)| **present)
        .map(|(status, _)| *status)
        .unwrap_or(JobStatus::Success)
}

/// Mean of the children's progress values, 0 with no children
pub fn aggregate_progress<I>(children: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = children
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), p| (sum + p, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
