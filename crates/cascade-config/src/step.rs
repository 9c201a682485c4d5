use serde::{Deserialize, Serialize};

/// What kind of unit of work a step runs.
///
/// Scrapers need a browser connection, scripts do not. Anything that is not a
/// scraper is treated like a script when its invocation envelope is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
  Scraper,
  Script,
  /// Any other type string, e.g. `renderlessScraper`.
  #[serde(other)]
  Other,
}

/// Per-step behavioral overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
  /// How many times the stage worker is re-invoked after a failed attempt.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retries: Option<u32>,

  /// Upper bound for a single attempt, in milliseconds.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,

  /// Stage-specific options, passed through to the stage untouched.
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A single step in a waterfall or parallel array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub stage_type: Option<StageType>,

  /// Module identifier, resolved to a stage worker at run time.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub module: Option<String>,

  /// Opaque parameters handed to the stage.
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub params: serde_json::Value,

  #[serde(default)]
  pub config: StepConfig,

  /// Spec for externally supplied capability modules.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub load: Option<serde_json::Value>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub waterfall: Option<Vec<Step>>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub parallel: Option<Vec<Step>>,
}

impl Step {
  /// Create a step that runs the given module.
  pub fn new(stage_type: StageType, module: impl Into<String>) -> Self {
    Self {
      stage_type: Some(stage_type),
      module: Some(module.into()),
      ..Self::default()
    }
  }

  /// Set the retry budget for this step.
  pub fn with_retries(mut self, retries: u32) -> Self {
    self.config.retries = Some(retries);
    self
  }

  /// Set the stage parameters.
  pub fn with_params(mut self, params: serde_json::Value) -> Self {
    self.params = params;
    self
  }

  /// Attach a nested waterfall array.
  pub fn with_waterfall(mut self, steps: Vec<Step>) -> Self {
    self.waterfall = Some(steps);
    self
  }

  /// Attach a nested parallel array.
  pub fn with_parallel(mut self, steps: Vec<Step>) -> Self {
    self.parallel = Some(steps);
    self
  }

  pub fn is_scraper(&self) -> bool {
    self.stage_type == Some(StageType::Scraper)
  }
}
