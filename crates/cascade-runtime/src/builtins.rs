//! Stages that ship with cascade.

use async_trait::async_trait;
use tracing::info;

use crate::error::StageError;
use crate::stage::{Stage, StageContext};

/// Yields its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl Stage for Passthrough {
  async fn run(
    &self,
    _ctx: &mut StageContext,
    input: serde_json::Value,
    _params: serde_json::Value,
  ) -> Result<Option<serde_json::Value>, StageError> {
    Ok(Some(input))
  }
}

/// Logs its input and yields it unchanged.
///
/// `params.message` replaces the default event label.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStage;

#[async_trait]
impl Stage for LogStage {
  async fn run(
    &self,
    ctx: &mut StageContext,
    input: serde_json::Value,
    params: serde_json::Value,
  ) -> Result<Option<serde_json::Value>, StageError> {
    let label = params
      .get("message")
      .and_then(serde_json::Value::as_str)
      .unwrap_or("stage_log");

    info!(
      stage = %ctx.save_topic(),
      operation_id = %ctx.envelope().operation_id,
      input = %input,
      "{}",
      label
    );

    Ok(Some(input))
  }
}
