// src/expansion/expander.rs
//! Cartesian expansion of a parameterized document
//!
//! ```text
//! {A: {x: [1, 2, 3]}, B: {y: [10, 20]}}
//!
//!   [{}]                         start
//!   [{A.x=1}, {A.x=2}, {A.x=3}]  ×3
//!   [{1,10}, {1,20}, {2,10}, …]  ×2   (B.y cycles fastest)
//! ```
//!
//! Scalars and single element lists are assigned into every partial
//! configuration without multiplying; empty lists assign nothing.

use crate::model::document::{ConcreteConfig, ConfigDocument, ExperimentalVariable, ParamValue};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result of expanding a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expansion {
    /// One concrete configuration per Cartesian-product point
    pub configs: Vec<ConcreteConfig>,

    /// Experimental variables in order of first encounter
    pub variables: Vec<ExperimentalVariable>,
}

impl Expansion {
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// Expand `document` into the Cartesian product of its list-valued parameters
pub fn expand(document: &ConfigDocument) -> Expansion {
    let mut configs = vec![ConcreteConfig::default()];
    let mut variables = Vec::new();

    for (module, parameter, value) in document.entries() {
        match value {
            ParamValue::Scalar(scalar) => {
                for config in &mut configs {
                    config.set(module, parameter, scalar.clone());
                }
            }
            ParamValue::List(values) if values.is_empty() => {}
            ParamValue::List(values) if values.len() == 1 => {
                for config in &mut configs {
                    config.set(module, parameter, values[0].clone());
                }
            }
            ParamValue::List(values) => {
                let mut next = Vec::with_capacity(configs.len() * values.len());
                for config in &configs {
                    for candidate in values {
                        let mut partial = config.clone();
                        partial.set(module, parameter, candidate.clone());
                        next.push(partial);
                    }
                }
                configs = next;

                variables.push(ExperimentalVariable {
                    module: module.to_string(),
                    parameter: parameter.to_string(),
                    values: values.clone(),
                });
            }
        }
    }

    debug!(
        "Expanded document into {} configurations over {} experimental variables",
        configs.len(),
        variables.len()
    );

    Expansion { configs, variables }
}

/// Resolve the target stopping time for a request
///
/// Experiments (`required = true`) need a finite, positive time. Standalone
/// simulations fall back to `default` when none is given.
pub fn resolve_target_time(requested: Option<f64>, required: bool, default: f64) -> Result<f64> {
    match requested {
        Some(time) if time.is_finite() && time > 0.0 => Ok(time),
        Some(time) => Err(EngineError::InvalidConfiguration(format!(
            "target time must be positive, got {}",
            time
        ))),
        None if required => Err(EngineError::InvalidConfiguration(
            "target time is required for experiments".into(),
        )),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::document::Scalar;
    use proptest::prelude::*;

    fn ints(values: &[i64]) -> ParamValue {
        ParamValue::List(values.iter().map(|v| Scalar::Int(*v)).collect())
    }

    #[test]
    fn test_two_variable_product() {
        let doc = ConfigDocument::new()
            .with("A", "x", ints(&[1, 2, 3]))
            .with("B", "y", ints(&[10, 20]));

        let expansion = expand(&doc);
        assert_eq!(expansion.len(), 6);
        assert_eq!(expansion.variables.len(), 2);
        assert_eq!(expansion.variables[0].key(), "A.x");
        assert_eq!(expansion.variables[1].key(), "B.y");

        let pairs: Vec<(i64, i64)> = expansion
            .configs
            .iter()
            .map(|c| {
                let x = c.get("A", "x").and_then(Scalar::as_f64).unwrap() as i64;
                let y = c.get("B", "y").and_then(Scalar::as_f64).unwrap() as i64;
                (x, y)
            })
            .collect();
        assert_eq!(
            pairs,
            vec![(1, 10), (1, 20), (2, 10), (2, 20), (3, 10), (3, 20)]
        );
    }

    #[test]
    fn test_fixed_and_degenerate_lists() {
        let doc = ConfigDocument::new()
            .with("A", "x", ints(&[1, 2]))
            .with("A", "fixed", ParamValue::Scalar(Scalar::Text("on".into())))
            .with("B", "single", ints(&[7]))
            .with("B", "empty", ints(&[]));

        let expansion = expand(&doc);
        assert_eq!(expansion.len(), 2);
        assert_eq!(expansion.variables.len(), 1);

        for config in &expansion.configs {
            assert_eq!(config.get("A", "fixed"), Some(&Scalar::Text("on".into())));
            assert_eq!(config.get("B", "single"), Some(&Scalar::Int(7)));
            assert_eq!(config.get("B", "empty"), None);
        }
    }

    #[test]
    fn test_scalar_after_variable_applies_to_all() {
        let doc = ConfigDocument::new()
            .with("A", "x", ints(&[1, 2, 3]))
            .with("A", "z", ParamValue::Scalar(Scalar::Bool(true)));

        let expansion = expand(&doc);
        assert!(expansion
            .configs
            .iter()
            .all(|c| c.get("A", "z") == Some(&Scalar::Bool(true))));
    }

    #[test]
    fn test_empty_document() {
        let expansion = expand(&ConfigDocument::new());
        assert_eq!(expansion.len(), 1);
        assert!(expansion.variables.is_empty());
    }

    #[test]
    fn test_target_time_resolution() {
        assert_eq!(resolve_target_time(Some(5.0), true, 1.0).unwrap(), 5.0);
        assert_eq!(resolve_target_time(None, false, 1.0).unwrap(), 1.0);
        assert!(resolve_target_time(None, true, 1.0).is_err());
        assert!(resolve_target_time(Some(0.0), true, 1.0).is_err());
        assert!(resolve_target_time(Some(-3.0), false, 1.0).is_err());
        assert!(resolve_target_time(Some(f64::NAN), false, 1.0).is_err());
    }

    proptest! {
        #[test]
        fn prop_count_is_product_of_list_lengths(lengths in proptest::collection::vec(0usize..4, 0..5)) {
            let mut doc = ConfigDocument::new();
            for (i, len) in lengths.iter().enumerate() {
                let values: Vec<i64> = (0..*len as i64).collect();
                doc.insert(&format!("m{}", i), "p", ints(&values));
            }

            let expected: usize = lengths.iter().map(|l| (*l).max(1)).product();
            let expansion = expand(&doc);

            prop_assert_eq!(expansion.len(), expected);
            prop_assert_eq!(
                expansion.variables.len(),
                lengths.iter().filter(|l| **l > 1).count()
            );
        }
    }
}
