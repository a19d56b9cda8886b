// src/expansion/mod.rs
//! Configuration expansion and run naming
//!
//! - **expander**: parameterized document → concrete configurations
//! - **naming**: deterministic, parseable run names

pub mod expander;
pub mod naming;

pub use expander::{expand, resolve_target_time, Expansion};
pub use naming::{index_width, parse_run_name, run_name, ParsedRunName};
