// src/summary/flatten.rs
//! Flattening of nested checkpoint statistics
//!
//! ```text
//! {"fungus": {"count": 3, "iron": {"mean": 0.5}}}
//!     → fungus.count = 3
//!       fungus.iron.mean = 0.5
//! ```

use serde_json::Value;
use std::collections::BTreeMap;

/// Key used when the statistics are a bare value instead of an object
pub const BARE_VALUE_KEY: &str = "value";

/// Flatten nested objects into dotted keys; arrays and scalars are leaves
pub fn flatten_stats(stats: &Value) -> BTreeMap<String, Value> {
    let mut flat = BTreeMap::new();

    match stats {
        Value::Object(_) => flatten_into(stats, "", &mut flat),
        Value::Null => {}
        other => {
            flat.insert(BARE_VALUE_KEY.to_string(), other.clone());
        }
    }

    flat
}

fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(child, &path, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
}

/// Text of a statistic as it appears in a table cell
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Time formatted as a summary key (`10`, `2.5`)
///
/// `-0.0` and `0.0` share the key `0`.
pub fn time_key(time: f64) -> String {
    let time = if time == 0.0 { 0.0 } else { time };
    format!("{}", time)
}
