//! Per-run context.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Values that are fixed for the duration of one run.
///
/// Built once when a run starts and shared by reference with every glue
/// processor, which copies these values into each invocation envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
  /// Where stages read and write their project files.
  pub project_folder: PathBuf,
  /// Root of the runner installation.
  pub app_root: PathBuf,
  /// Unique id of this run.
  pub operation_id: String,
  pub start_date: DateTime<Utc>,
  /// Name of the process that owns the run, for stage-side logging.
  pub proc_name: String,
  /// Browser connection options handed to scrapers.
  pub connection_config: serde_json::Value,
}

impl RunContext {
  pub fn new(project_folder: impl Into<PathBuf>, app_root: impl Into<PathBuf>) -> Self {
    Self {
      project_folder: project_folder.into(),
      app_root: app_root.into(),
      operation_id: uuid::Uuid::new_v4().to_string(),
      start_date: Utc::now(),
      proc_name: "cascade".to_string(),
      connection_config: serde_json::Value::Null,
    }
  }

  pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
    self.operation_id = operation_id.into();
    self
  }

  pub fn with_proc_name(mut self, proc_name: impl Into<String>) -> Self {
    self.proc_name = proc_name.into();
    self
  }

  pub fn with_connection_config(mut self, connection_config: serde_json::Value) -> Self {
    self.connection_config = connection_config;
    self
  }
}
