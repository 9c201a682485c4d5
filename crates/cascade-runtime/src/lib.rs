//! Cascade Runtime
//!
//! This crate drives a compiled pipeline to completion. Every edge of the
//! compiled graph becomes a consumer task that polls its input topic in the
//! commit log, processes entries in order and publishes the results:
//!
//! - Glue and finish edges reshape or forward entries.
//! - Worker edges invoke the [`Stage`] registered for the step's module, with
//!   the step's retry budget and timeout. A stage that never succeeds disables
//!   its consumer, halting that branch while sibling branches carry on.
//! - Commit-log calls go through [`with_retry`], an infrastructure retry layer
//!   independent of the stage budget.
//!
//! A run ends when the graph is quiescent, or when it is cancelled. Because
//! cursors live in the log, a run over a durable log can be resumed later.

mod builtins;
mod error;
mod result;
mod retry;
mod runtime;
mod stage;
mod worker;

pub use builtins::{LogStage, Passthrough};
pub use error::{RuntimeError, StageError};
pub use result::{RunOutcome, RunSummary, StageFailure};
pub use retry::{RetryPolicy, with_retry};
pub use runtime::{RunOptions, Runtime, RuntimeConfig};
pub use stage::{CONTINUE_KEY, Stage, StageContext, StageRegistry};
