// src/summary/table.rs
//! CSV rendering of summaries
//!
//! Simulation table: one row per time step, columns `time` followed by the
//! sorted union of statistic keys.
//!
//! Experiment table: one row per time in the union of all children's times,
//! columns `time` followed by `<child name>/<key>` for every child in summary
//! order. A child without a value at some time renders an empty cell.

use crate::summary::flatten::{cell_text, time_key};
use crate::summary::{ExperimentSummary, SimulationSummary, TimeStep};
use crate::utils::errors::{EngineError, Result};
use std::collections::{BTreeMap, BTreeSet};

fn key_union(steps: &[TimeStep]) -> Vec<String> {
    steps
        .iter()
        .flat_map(|step| step.stats.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| EngineError::ExecutionError(format!("flushing csv: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| EngineError::ExecutionError(format!("csv is not utf-8: {}", e)))
}

/// Render a simulation summary as CSV
pub fn simulation_csv(summary: &SimulationSummary) -> Result<String> {
    let keys = key_union(&summary.steps);
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["time".to_string()];
    header.extend(keys.iter().cloned());
    writer.write_record(&header)?;

    for step in &summary.steps {
        let mut row = vec![time_key(step.time)];
        row.extend(
            keys.iter()
                .map(|key| step.stats.get(key).map(cell_text).unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }

    finish(writer)
}

/// Render an experiment summary as CSV
pub fn experiment_csv(summary: &ExperimentSummary) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    // (child index, key) per column
    let mut columns: Vec<(usize, String)> = Vec::new();
    let mut header = vec!["time".to_string()];
    for (index, child) in summary.children.iter().enumerate() {
        for key in key_union(&child.stats) {
            header.push(format!("{}/{}", child.name, key));
            columns.push((index, key));
        }
    }
    writer.write_record(&header)?;

    // time → step, per child; times are matched by their key text
    let lookup: Vec<BTreeMap<String, &TimeStep>> = summary
        .children
        .iter()
        .map(|child| {
            child
                .stats
                .iter()
                .map(|step| (time_key(step.time), step))
                .collect()
        })
        .collect();

    for &time in &summary.times {
        let time_text = time_key(time);
        let mut row = vec![time_text.clone()];

        for (index, key) in &columns {
            let cell = lookup[*index]
                .get(&time_text)
                .and_then(|step| step.stats.get(key))
                .map(cell_text)
                .unwrap_or_default();
            row.push(cell);
        }
        writer.write_record(&row)?;
    }

    finish(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::status::JobStatus;
    use crate::summary::ChildSummary;
    use serde_json::json;

    fn step(time: f64, pairs: &[(&str, serde_json::Value)]) -> TimeStep {
        TimeStep {
            time,
            stats: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn child(name: &str, group: usize, stats: Vec<TimeStep>) -> ChildSummary {
        ChildSummary {
            id: name.to_string(),
            name: name.to_string(),
            complete: false,
            status: JobStatus::Running,
            progress: 0.0,
            group,
            stats,
        }
    }

    #[test]
    fn test_simulation_table() {
        let summary = SimulationSummary {
            id: "s".into(),
            name: "s".into(),
            complete: true,
            status: JobStatus::Success,
            steps: vec![
                step(2.0, &[("a", json!(1))]),
                step(10.0, &[("a", json!(2)), ("b", json!("x"))]),
            ],
        };

        let csv = simulation_csv(&summary).unwrap();
        assert_eq!(csv, "time,a,b\n2,1,\n10,2,x\n");
    }

    #[test]
    fn test_experiment_table_aligns_lagging_child() {
        let summary = ExperimentSummary {
            id: "e".into(),
            name: "e".into(),
            variables: Vec::new(),
            groups: Vec::new(),
            status: JobStatus::Running,
            progress: 0.0,
            children: vec![
                child("fast", 0, vec![step(0.0, &[("n", json!(1))]), step(5.0, &[("n", json!(2))])]),
                child("slow", 1, vec![step(0.0, &[("n", json!(7))])]),
            ],
            times: vec![0.0, 5.0],
        };

        let csv = experiment_csv(&summary).unwrap();
        assert_eq!(csv, "time,fast/n,slow/n\n0,1,7\n5,2,\n");
    }

    #[test]
    fn test_negative_zero_time_matches_zero() {
        let summary = ExperimentSummary {
            id: "e".into(),
            name: "e".into(),
            variables: Vec::new(),
            groups: Vec::new(),
            status: JobStatus::Running,
            progress: 0.0,
            children: vec![
                child("a", 0, vec![step(-0.0, &[("n", json!(1))])]),
                child("b", 1, vec![step(0.0, &[("n", json!(7))])]),
            ],
            times: vec![-0.0],
        };

        let csv = experiment_csv(&summary).unwrap();
        assert_eq!(csv, "time,a/n,b/n\n0,1,7\n");
    }

    #[test]
    fn test_empty_experiment() {
        let summary = ExperimentSummary {
            id: "e".into(),
            name: "e".into(),
            variables: Vec::new(),
            groups: Vec::new(),
            status: JobStatus::Inactive,
            progress: 0.0,
            children: Vec::new(),
            times: Vec::new(),
        };
        assert_eq!(experiment_csv(&summary).unwrap(), "time\n");
    }
}
