// src/summary/grouping.rs
//! Experimental-variable groups and configuration range filters
//!
//! Groups are the points of the Cartesian product of the experimental
//! variables, enumerated in expansion order (the last variable cycles
//! fastest). A child belongs to the first group whose assignments all match
//! its concrete configuration.

use crate::model::document::{ConcreteConfig, ExperimentalVariable, Scalar};
use crate::utils::errors::{EngineError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One point of the experimental-variable product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub index: usize,

    /// `module.parameter → value`
    pub assignments: IndexMap<String, Scalar>,
}

impl Group {
    fn matches(&self, config: &ConcreteConfig, variables: &[ExperimentalVariable]) -> bool {
        variables.iter().all(|variable| {
            let expected = self.assignments.get(&variable.key());
            let actual = config.get(&variable.module, &variable.parameter);
            match (expected, actual) {
                (Some(expected), Some(actual)) => expected.same_value(actual),
                _ => false,
            }
        })
    }
}

/// Enumerate the groups of `variables`
///
/// Without variables there is a single group with no assignments.
pub fn groups(variables: &[ExperimentalVariable]) -> Vec<IndexMap<String, Scalar>> {
    let mut points = vec![IndexMap::new()];

    for variable in variables {
        let key = variable.key();
        let mut next = Vec::with_capacity(points.len() * variable.values.len());
        for point in &points {
            for value in &variable.values {
                let mut extended = point.clone();
                extended.insert(key.clone(), value.clone());
                next.push(extended);
            }
        }
        points = next;
    }

    points
}

/// Indexed groups of `variables`
pub fn indexed_groups(variables: &[ExperimentalVariable]) -> Vec<Group> {
    groups(variables)
        .into_iter()
        .enumerate()
        .map(|(index, assignments)| Group { index, assignments })
        .collect()
}

/// Index of the first group matching `config`
pub fn assign_group(
    config: &ConcreteConfig,
    groups: &[Group],
    variables: &[ExperimentalVariable],
) -> Option<usize> {
    groups
        .iter()
        .find(|group| group.matches(config, variables))
        .map(|group| group.index)
}

/// Inclusive numeric range on one configuration value
///
/// Written as a `(module, key, [min, max])` triple where either bound may be
/// `null` for an open end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RangeTriple", into = "RangeTriple")]
pub struct RangeFilter {
    pub module: String,
    pub parameter: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Serialize, Deserialize)]
struct RangeTriple(String, String, [Option<f64>; 2]);

impl From<RangeTriple> for RangeFilter {
    fn from(RangeTriple(module, parameter, [min, max]): RangeTriple) -> Self {
        Self {
            module,
            parameter,
            min,
            max,
        }
    }
}

impl From<RangeFilter> for RangeTriple {
    fn from(filter: RangeFilter) -> Self {
        RangeTriple(filter.module, filter.parameter, [filter.min, filter.max])
    }
}

impl RangeFilter {
    pub fn new(module: &str, parameter: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            module: module.to_string(),
            parameter: parameter.to_string(),
            min,
            max,
        }
    }

    /// Parse a JSON list of triples, e.g. `[["fungus", "init_num", [10, null]]]`
    pub fn parse_list(text: &str) -> Result<Vec<RangeFilter>> {
        let filters: Vec<RangeFilter> = serde_json::from_str(text).map_err(|e| {
            EngineError::InvalidConfiguration(format!("invalid range filter: {}", e))
        })?;
        Ok(filters)
    }

    /// Whether the configured value lies in the range
    ///
    /// Missing or non-numeric values never match.
    pub fn matches(&self, config: &ConcreteConfig) -> bool {
        let Some(value) = config
            .get(&self.module, &self.parameter)
            .and_then(Scalar::as_f64)
        else {
            return false;
        };

        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Whether `config` passes every filter
pub fn passes_all(config: &ConcreteConfig, filters: &[RangeFilter]) -> bool {
    filters.iter().all(|filter| filter.matches(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variables() -> Vec<ExperimentalVariable> {
        vec![
            ExperimentalVariable {
                module: "a".into(),
                parameter: "x".into(),
                values: vec![Scalar::Int(1), Scalar::Int(2)],
            },
            ExperimentalVariable {
                module: "b".into(),
                parameter: "y".into(),
                values: vec![Scalar::Text("lo".into()), Scalar::Text("hi".into())],
            },
        ]
    }

    fn config(x: Scalar, y: &str) -> ConcreteConfig {
        let mut config = ConcreteConfig::default();
        config.set("a", "x", x);
        config.set("b", "y", Scalar::Text(y.into()));
        config
    }

    #[test]
    fn test_group_order_matches_expansion() {
        let groups = groups(&variables());
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[1]["a.x"], Scalar::Int(1));
        assert_eq!(groups[1]["b.y"], Scalar::Text("hi".into()));
        assert_eq!(groups[2]["a.x"], Scalar::Int(2));
    }

    #[test]
    fn test_assign_group() {
        let vars = variables();
        let groups = indexed_groups(&vars);

        assert_eq!(assign_group(&config(Scalar::Int(2), "lo"), &groups, &vars), Some(2));
        // numeric equality across int/float
        assert_eq!(assign_group(&config(Scalar::Float(1.0), "hi"), &groups, &vars), Some(1));
        assert_eq!(assign_group(&config(Scalar::Int(3), "lo"), &groups, &vars), None);
    }

    #[test]
    fn test_no_variables_single_group() {
        let groups = indexed_groups(&[]);
        assert_eq!(groups.len(), 1);
        assert_eq!(assign_group(&ConcreteConfig::default(), &groups, &[]), Some(0));
    }

    #[test]
    fn test_range_filter_bounds() {
        let filter = RangeFilter::new("a", "x", Some(1.0), Some(2.0));
        assert!(filter.matches(&config(Scalar::Int(1), "lo")));
        assert!(filter.matches(&config(Scalar::Int(2), "lo")));
        assert!(!filter.matches(&config(Scalar::Float(2.5), "lo")));

        let open = RangeFilter::new("a", "x", None, Some(1.5));
        assert!(open.matches(&config(Scalar::Int(-100), "lo")));

        let text = RangeFilter::new("b", "y", None, None);
        assert!(!text.matches(&config(Scalar::Int(1), "lo")));

        let missing = RangeFilter::new("c", "z", None, None);
        assert!(!missing.matches(&config(Scalar::Int(1), "lo")));
    }

    #[test]
    fn test_parse_triples() {
        let filters =
            RangeFilter::parse_list(r#"[["a", "x", [1, null]], ["b", "y", [null, 3.5]]]"#).unwrap();
        assert_eq!(filters[0], RangeFilter::new("a", "x", Some(1.0), None));
        assert_eq!(filters[1], RangeFilter::new("b", "y", None, Some(3.5)));

        assert!(RangeFilter::parse_list(r#"[["a", "x"]]"#).is_err());
    }
}
