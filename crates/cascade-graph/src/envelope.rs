//! Stage invocation envelopes.

use std::path::PathBuf;

use cascade_config::{Step, StepConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::context::RunContext;

/// Everything a stage worker needs for one invocation.
///
/// Glue edges publish envelopes to `pre_<stage>` topics. Scraper envelopes carry
/// the step config, the load spec and the browser connection config; script
/// envelopes leave those out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
  /// Body of the upstream log entry.
  pub input: serde_json::Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub config: Option<StepConfig>,
  #[serde(default)]
  pub params: serde_json::Value,
  #[serde(
    default,
    deserialize_with = "present",
    skip_serializing_if = "Option::is_none"
  )]
  pub load: Option<serde_json::Value>,
  pub module: String,
  #[serde(
    default,
    deserialize_with = "present",
    skip_serializing_if = "Option::is_none"
  )]
  pub connection_config: Option<serde_json::Value>,
  /// Topic the worker publishes its results to: the stage's own name.
  pub save_topic: String,
  pub project_folder: PathBuf,
  pub operation_id: String,
  pub start_date: DateTime<Utc>,
  pub proc_name: String,
  pub app_root: PathBuf,
}

impl Envelope {
  /// Build the envelope for `step`, wrapping `input`.
  pub fn new(
    step: &Step,
    module: &str,
    save_topic: &str,
    ctx: &RunContext,
    input: serde_json::Value,
  ) -> Self {
    let scraper = step.is_scraper();

    Self {
      input,
      config: scraper.then(|| step.config.clone()),
      params: step.params.clone(),
      load: if scraper {
        Some(step.load.clone().unwrap_or(serde_json::Value::Null))
      } else {
        None
      },
      module: module.to_string(),
      connection_config: scraper.then(|| ctx.connection_config.clone()),
      save_topic: save_topic.to_string(),
      project_folder: ctx.project_folder.clone(),
      operation_id: ctx.operation_id.clone(),
      start_date: ctx.start_date,
      proc_name: ctx.proc_name.clone(),
      app_root: ctx.app_root.clone(),
    }
  }

  /// A copy of this envelope carrying a different input.
  pub fn with_input(&self, input: serde_json::Value) -> Self {
    Self {
      input,
      ..self.clone()
    }
  }
}

/// A key that is present is `Some`, even when its value is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
  D: Deserializer<'de>,
{
  serde_json::Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
  use super::*;
  use cascade_config::StageType;
  use serde_json::json;

  fn context() -> RunContext {
    RunContext::new("/tmp/project", "/opt/cascade")
      .with_operation_id("op-1")
      .with_connection_config(json!({ "port": 9222 }))
  }

  #[test]
  fn test_scraper_envelope_carries_browser_fields() {
    let step = Step::new(StageType::Scraper, "search").with_retries(2);
    let envelope = Envelope::new(&step, "search", "waterfall_0", &context(), json!({ "q": 1 }));
    let value = serde_json::to_value(&envelope).unwrap();

    assert_eq!(value["input"], json!({ "q": 1 }));
    assert_eq!(value["config"], json!({ "retries": 2 }));
    assert_eq!(value["load"], serde_json::Value::Null);
    assert_eq!(value["connectionConfig"], json!({ "port": 9222 }));
    assert_eq!(value["saveTopic"], "waterfall_0");
    assert_eq!(value["operationId"], "op-1");
    assert_eq!(value["projectFolder"], "/tmp/project");
  }

  #[test]
  fn test_script_envelope_omits_browser_fields() {
    let step = Step::new(StageType::Script, "save").with_params(json!({ "file": "out.csv" }));
    let envelope = Envelope::new(&step, "save", "waterfall_1", &context(), json!([]));
    let value = serde_json::to_value(&envelope).unwrap();
    let object = value.as_object().unwrap();

    assert!(!object.contains_key("config"));
    assert!(!object.contains_key("load"));
    assert!(!object.contains_key("connectionConfig"));
    assert_eq!(value["params"], json!({ "file": "out.csv" }));
    assert_eq!(value["module"], "save");
  }

  #[test]
  fn test_envelope_deserializes_from_log_body() {
    let step = Step::new(StageType::Script, "save");
    let envelope = Envelope::new(&step, "save", "waterfall_1", &context(), json!(7));
    let value = serde_json::to_value(&envelope).unwrap();

    let parsed: Envelope = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, envelope);
    assert_eq!(parsed.with_input(json!(8)).input, json!(8));
  }

  #[test]
  fn test_scraper_envelope_keeps_null_load_through_the_log() {
    let step = Step::new(StageType::Scraper, "search");
    let ctx = RunContext::new("/tmp/project", "/opt/cascade");
    let envelope = Envelope::new(&step, "search", "waterfall_0", &ctx, json!(1));
    assert_eq!(envelope.load, Some(serde_json::Value::Null));

    let parsed: Envelope = serde_json::from_value(serde_json::to_value(&envelope).unwrap()).unwrap();
    assert_eq!(parsed, envelope);

    let refed = serde_json::to_value(parsed.with_input(json!(2))).unwrap();
    let object = refed.as_object().unwrap();
    assert!(object.contains_key("load"));
    assert!(object.contains_key("connectionConfig"));
    assert_eq!(refed["input"], json!(2));
  }

  #[test]
  fn test_unknown_stage_type_builds_script_envelope() {
    let step: Step = serde_json::from_value(json!({
      "type": "renderlessScraper",
      "module": "x"
    }))
    .unwrap();
    let envelope = Envelope::new(&step, "x", "waterfall_0", &context(), json!({}));
    let value = serde_json::to_value(&envelope).unwrap();
    let object = value.as_object().unwrap();

    assert!(!object.contains_key("config"));
    assert!(!object.contains_key("load"));
    assert!(!object.contains_key("connectionConfig"));
    assert_eq!(value["module"], "x");
  }
}
