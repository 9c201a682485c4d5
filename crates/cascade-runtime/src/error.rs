//! Runtime error types.

use cascade_store::StoreError;
use cascade_topology::TopologyError;

/// Errors raised by a stage invocation.
///
/// Every variant counts against the stage's retry budget.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
  /// The stage reported a failure.
  #[error("{message}")]
  Failed { message: String },

  /// An attempt ran past the step's `timeoutMs`.
  #[error("stage timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  /// The stage could not make sense of its input.
  #[error("invalid stage input: {0}")]
  InvalidInput(#[from] serde_json::Error),
}

impl StageError {
  pub fn failed(message: impl Into<String>) -> Self {
    StageError::Failed {
      message: message.into(),
    }
  }
}

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// The pipeline's topology is invalid.
  #[error(transparent)]
  Topology(#[from] TopologyError),

  /// A step names a module with no registered stage.
  #[error("no stage registered for module '{module}' used by '{stage}'")]
  UnknownModule { module: String, stage: String },

  /// The commit log failed, even after retrying.
  #[error("commit log error: {0}")]
  Store(#[from] StoreError),

  /// An edge task panicked or was aborted.
  #[error("edge task for '{edge}' failed: {message}")]
  EdgeTask { edge: String, message: String },
}
