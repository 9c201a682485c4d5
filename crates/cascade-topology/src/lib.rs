//! Cascade Topology
//!
//! Turns a nested waterfall/parallel [`Pipeline`](cascade_config::Pipeline) into
//! a flat, order-preserving list of [`StagePath`]s and checks its structure.
//!
//! - [`flatten`] walks the config tree and names every step by its position
//!   (`waterfall_0`, `waterfall_0_parallel_1`, ...).
//! - [`check_step_levels`] and [`validate_step_format`] enforce the two
//!   structural rules: at most two nesting levels, no empty levels, and no
//!   same-kind-inside-same-kind nesting.
//! - [`resolve`] maps a stage path back to the step that declared it.
//!
//! Names are a pure function of tree position, so re-flattening the same config
//! always yields the same paths. Resumed runs depend on that.

mod error;
mod flatten;
mod path;
mod resolve;
mod validate;

pub use error::TopologyError;
pub use flatten::{FlatEntry, FlatList, StepTree, flatten, flatten_value};
pub use path::{Segment, StagePath, StepKind};
pub use resolve::resolve;
pub use validate::{check_step_levels, validate, validate_step_format};
