// src/expansion/naming.rs
//! Deterministic run names
//!
//! `<base>-run-<index>` followed by `-<module>.<parameter>-<value>` for every
//! experimental variable, in discovery order:
//!
//! ```text
//! sweep-run-03-fungus.init_num-20-macrophage.rec_rate-0.5
//! ```
//!
//! Name collisions in one parent are resolved by the artifact sink, not here.

use crate::model::document::{ConcreteConfig, ExperimentalVariable, Scalar};
use serde::{Deserialize, Serialize};

/// Zero-pad width for run indices: `floor(1 + log10(runs_per_config))`, at least 1
pub fn index_width(runs_per_config: u32) -> usize {
    (runs_per_config.max(1).ilog10() + 1) as usize
}

/// Build the name of one run
pub fn run_name(
    base: &str,
    index: u32,
    width: usize,
    variables: &[ExperimentalVariable],
    config: &ConcreteConfig,
) -> String {
    let mut name = format!("{}-run-{:0width$}", base, index, width = width);

    for variable in variables {
        let value = config
            .get(&variable.module, &variable.parameter)
            .map(Scalar::to_string)
            .unwrap_or_default();
        name.push_str(&format!(
            "-{}.{}-{}",
            variable.module, variable.parameter, value
        ));
    }

    name
}

/// Components recovered from a run name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRunName {
    pub base: String,
    pub index: u32,
    /// `(module.parameter, value)` in variable order
    pub assignments: Vec<(String, Scalar)>,
}

/// Invert [`run_name`] given the experimental variables it was built with
///
/// Values are mapped back onto the matching candidate scalar; a value that
/// matches no candidate is returned as text. Returns `None` when the name
/// does not have the expected shape.
pub fn parse_run_name(name: &str, variables: &[ExperimentalVariable]) -> Option<ParsedRunName> {
    let mut rest = name;
    let mut assignments = Vec::with_capacity(variables.len());

    for variable in variables.iter().rev() {
        let marker = format!("-{}.{}-", variable.module, variable.parameter);
        let pos = rest.rfind(&marker)?;
        let raw = &rest[pos + marker.len()..];

        let value = variable
            .values
            .iter()
            .find(|candidate| candidate.to_string() == raw)
            .cloned()
            .unwrap_or_else(|| Scalar::Text(raw.to_string()));

        assignments.push((variable.key(), value));
        rest = &rest[..pos];
    }
    assignments.reverse();

    let (base, index) = rest.rsplit_once("-run-")?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(ParsedRunName {
        base: base.to_string(),
        index: index.parse().ok()?,
        assignments,
    })
}
