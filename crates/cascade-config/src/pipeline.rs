use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::step::Step;

/// Global options shared by every stage in a run.
///
/// Browser-specific keys (ports, launch flags, ...) are not interpreted here;
/// they are kept in `extra` and handed to scrapers as their connection config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub workers: Option<usize>,

  #[serde(default)]
  pub persistent_session: bool,

  /// How long an idle edge sleeps between polls of its input topic.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub poll_interval_ms: Option<u64>,

  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A complete pipeline definition.
///
/// Exactly one of `waterfall` or `parallel` is expected at the top level;
/// that rule is enforced by topology validation, not by deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
  #[serde(default)]
  pub config: GlobalConfig,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub waterfall: Option<Vec<Step>>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub parallel: Option<Vec<Step>>,
}

impl Pipeline {
  /// A pipeline with a top-level waterfall.
  pub fn waterfall(steps: Vec<Step>) -> Self {
    Self {
      waterfall: Some(steps),
      ..Self::default()
    }
  }

  /// A pipeline with a top-level parallel array.
  pub fn parallel(steps: Vec<Step>) -> Self {
    Self {
      parallel: Some(steps),
      ..Self::default()
    }
  }

  /// Parse a pipeline from a JSON value.
  pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
    if value.is_null() {
      return Err(ConfigError::NotAnObject);
    }
    Ok(serde_json::from_value(value)?)
  }

  /// Parse a pipeline from a JSON string.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    Self::from_value(serde_json::from_str(json)?)
  }

  /// Read and parse a pipeline from a JSON file.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Self::from_json_str(&content)
  }

  /// The global config as the JSON object handed to scrapers.
  pub fn connection_config(&self) -> serde_json::Value {
    serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
  }
}
