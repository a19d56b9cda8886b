// src/model/document.rs
//! Configuration documents
//!
//! A document is a two-level ordered mapping `module → parameter → value`.
//! A value is either a scalar or a list of scalars; lists longer than one
//! element turn the `(module, parameter)` pair into an experimental variable.
//!
//! ```yaml
//! fungus:
//!   init_num: [10, 20, 40]   # experimental variable
//!   iron_min: 5              # fixed
//! macrophage:
//!   rec_rate: [0.1]          # fixed (single element list)
//! ```

use crate::utils::errors::{EngineError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A single parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Numeric view of the value, if it is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Value equality that treats `Int(2)` and `Float(2.0)` as the same value
    pub fn same_value(&self, other: &Scalar) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) | Scalar::Float(_) => "number",
            Scalar::Text(_) => "string",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(v) => f.write_str(v),
        }
    }
}

/// A configured parameter value: one scalar or an ordered list of candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    List(Vec<Scalar>),
    Scalar(Scalar),
}

/// Parameterized configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDocument {
    pub modules: IndexMap<String, IndexMap<String, ParamValue>>,
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, keeps declaration order
    pub fn with(mut self, module: &str, parameter: &str, value: ParamValue) -> Self {
        self.insert(module, parameter, value);
        self
    }

    pub fn insert(&mut self, module: &str, parameter: &str, value: ParamValue) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(parameter.to_string(), value);
    }

    /// Iterate `(module, parameter, value)` in declaration order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &ParamValue)> {
        self.modules.iter().flat_map(|(module, params)| {
            params
                .iter()
                .map(move |(param, value)| (module.as_str(), param.as_str(), value))
        })
    }

    /// Parse a document from JSON or YAML text (JSON is valid YAML)
    ///
    /// Malformed text or values that are neither a scalar nor a flat list
    /// are rejected as [`EngineError::InvalidConfiguration`].
    pub fn parse(text: &str) -> Result<Self> {
        let document: ConfigDocument = serde_yaml::from_str(text).map_err(|e| {
            EngineError::InvalidConfiguration(format!("malformed configuration document: {}", e))
        })?;
        document.validate()?;
        Ok(document)
    }

    /// Read a document from a `.json`, `.yaml` or `.yml` file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Check key and list invariants
    pub fn validate(&self) -> Result<()> {
        for (module, params) in &self.modules {
            if module.is_empty() {
                return Err(EngineError::InvalidConfiguration(
                    "module names must be non-empty".into(),
                ));
            }
            for (param, value) in params {
                if param.is_empty() {
                    return Err(EngineError::InvalidConfiguration(format!(
                        "parameter names in module '{}' must be non-empty",
                        module
                    )));
                }
                if let ParamValue::List(values) = value {
                    if let Some(first) = values.first() {
                        if values.iter().any(|v| v.kind() != first.kind()) {
                            return Err(EngineError::InvalidConfiguration(format!(
                                "list for {}.{} mixes value types",
                                module, param
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// A document with every parameter resolved to a single scalar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcreteConfig {
    pub modules: IndexMap<String, IndexMap<String, Scalar>>,
}

impl ConcreteConfig {
    pub fn get(&self, module: &str, parameter: &str) -> Option<&Scalar> {
        self.modules.get(module).and_then(|params| params.get(parameter))
    }

    pub fn set(&mut self, module: &str, parameter: &str, value: Scalar) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(parameter.to_string(), value);
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A `(module, parameter)` pair whose value list drives the Cartesian product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentalVariable {
    pub module: String,
    pub parameter: String,
    pub values: Vec<Scalar>,
}

impl ExperimentalVariable {
    /// `module.parameter`
    pub fn key(&self) -> String {
        format!("{}.{}", self.module, self.parameter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_preserves_order() {
        let doc = ConfigDocument::parse(
            "b:\n  y: [10, 20]\n  a: 1\na:\n  x: [1.5, 2.5]\n",
        )
        .unwrap();

        let keys: Vec<_> = doc.entries().map(|(m, p, _)| format!("{}.{}", m, p)).collect();
        assert_eq!(keys, vec!["b.y", "b.a", "a.x"]);
        assert_eq!(
            doc.modules["b"]["y"],
            ParamValue::List(vec![Scalar::Int(10), Scalar::Int(20)])
        );
        assert_eq!(doc.modules["b"]["a"], ParamValue::Scalar(Scalar::Int(1)));
    }

    #[test]
    fn test_parse_json() {
        let doc = ConfigDocument::parse(r#"{"sim": {"name": "run", "flag": true}}"#).unwrap();
        assert_eq!(
            doc.modules["sim"]["name"],
            ParamValue::Scalar(Scalar::Text("run".into()))
        );
        assert_eq!(doc.modules["sim"]["flag"], ParamValue::Scalar(Scalar::Bool(true)));
    }

    #[test]
    fn test_rejects_mixed_list() {
        let result = ConfigDocument::parse("m:\n  p: [1, \"a\"]\n");
        assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_malformed_values_are_client_errors() {
        for text in [
            "fungus:\n  init_num: null\n",
            "fungus:\n  init_num:\n    nested: 1\n",
            "fungus:\n  init_num: [[1, 2], [3]]\n",
            "fungus: [1, 2]\n",
        ] {
            let err = ConfigDocument::parse(text).unwrap_err();
            assert!(
                matches!(err, EngineError::InvalidConfiguration(_)),
                "{:?} gave {:?}",
                text,
                err
            );
            assert!(err.is_client_error());
        }
    }

    #[test]
    fn test_rejects_empty_parameter() {
        let doc = ConfigDocument::new().with("m", "", ParamValue::Scalar(Scalar::Int(1)));
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_numeric_value_equality() {
        assert!(Scalar::Int(2).same_value(&Scalar::Float(2.0)));
        assert!(!Scalar::Int(2).same_value(&Scalar::Text("2".into())));
        assert_eq!(Scalar::Float(0.5).to_string(), "0.5");
    }
}
