//! Cascade Config
//!
//! This crate contains the serializable pipeline configuration types for cascade.
//! A pipeline is a tree of steps: the root declares either a `waterfall` (serial)
//! or a `parallel` (fan-out) array, and each step may carry its own child array
//! of the opposite kind.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `cascade run pipeline.json`)
//! - Inline JSON strings (via CLI with `--json-config`)
//!
//! These types are immutable once loaded. The topology crate flattens them into
//! stage paths and the graph crate compiles those paths into edges.

mod error;
mod pipeline;
mod step;

pub use error::ConfigError;
pub use pipeline::{GlobalConfig, Pipeline};
pub use step::{StageType, Step, StepConfig};
