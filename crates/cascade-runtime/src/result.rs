//! Run result types.

use cascade_store::DisabledConsumer;
use serde::{Deserialize, Serialize};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
  /// Every terminal edge delivered and no consumer is disabled.
  Completed,
  /// The graph went quiet with at least one branch halted.
  Halted,
  /// The cancellation token fired before the graph went quiet.
  Cancelled,
}

/// A stage whose retry budget ran out during this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
  /// Consumer id of the failed edge.
  pub consumer: String,
  /// Name of the stage, i.e. the edge's `to` topic.
  pub stage: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub module: Option<String>,
  /// Offset of the entry that could not be processed.
  pub offset: u64,
  pub attempts: u32,
  pub error: String,
}

/// Result of [`Runtime::run`](crate::Runtime::run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
  pub operation_id: String,
  pub outcome: RunOutcome,
  /// Bodies committed to the terminal topic, in commit order.
  pub terminal: Vec<serde_json::Value>,
  /// Failures recorded by this run.
  pub failures: Vec<StageFailure>,
  /// Every consumer disabled at the end of the run, including ones carried
  /// over from an earlier run.
  pub disabled: Vec<DisabledConsumer>,
}

impl RunSummary {
  pub fn is_completed(&self) -> bool {
    self.outcome == RunOutcome::Completed
  }
}
