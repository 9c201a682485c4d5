//! Cascade Graph
//!
//! This crate compiles a validated topology into the list of directed edges the
//! execution driver runs. Every edge reads one topic, processes each entry with
//! a [`Processor`], and publishes to one topic:
//!
//! ```text
//! init -> pre_waterfall_0 -> waterfall_0 -> pre_waterfall_1 -> waterfall_1 -> pre_end
//!      glue              worker         glue              worker         finish
//! ```
//!
//! Glue edges reshape the previous stage's output into an invocation
//! [`Envelope`] for the next stage; worker edges hand that envelope to the
//! stage's module. Topic names are a pure function of the config shape, which is
//! what lets a resumed run reconnect to the topics of an earlier one.

mod compiler;
mod context;
mod edge;
mod envelope;
mod graph;
mod topic;

pub use compiler::{Compilation, compile, compile_pipeline};
pub use context::RunContext;
pub use edge::{Edge, EdgeConfig, EdgePlan, GlueFn, Processor, ProcessorKind};
pub use envelope::Envelope;
pub use graph::Graph;
pub use topic::{Node, Topic};
