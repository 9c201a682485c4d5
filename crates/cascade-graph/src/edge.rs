//! Compiled edges.

use std::fmt;
use std::sync::Arc;

use cascade_config::StageType;
use serde::{Deserialize, Serialize};

use crate::topic::Topic;

/// A glue processor: reshapes an upstream entry body into the next stage's
/// invocation envelope.
pub type GlueFn = Arc<dyn Fn(&serde_json::Value) -> Result<serde_json::Value, serde_json::Error> + Send + Sync>;

/// What an edge does with each entry it reads.
#[derive(Clone)]
pub enum Processor {
  /// Pure reshaping, no external work.
  Glue(GlueFn),
  /// Invoke the stage worker registered for `module`.
  Worker {
    module: String,
    stage_type: Option<StageType>,
  },
  /// Forward the entry body unchanged to the terminal topic.
  Finish,
}

impl Processor {
  pub fn kind(&self) -> ProcessorKind {
    match self {
      Processor::Glue(_) => ProcessorKind::Glue,
      Processor::Worker { .. } => ProcessorKind::Worker,
      Processor::Finish => ProcessorKind::Finish,
    }
  }
}

impl fmt::Debug for Processor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Processor::Glue(_) => f.write_str("Glue(..)"),
      Processor::Worker { module, stage_type } => f
        .debug_struct("Worker")
        .field("module", module)
        .field("stage_type", stage_type)
        .finish(),
      Processor::Finish => f.write_str("Finish"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
  Glue,
  Worker,
  Finish,
}

/// Execution settings attached to an edge.
///
/// Only worker edges carry a retry budget; glue and finish edges always use
/// the default (empty) config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeConfig {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retries: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

/// One compiled transition: read `from`, process, publish to `to`.
#[derive(Debug, Clone)]
pub struct Edge {
  /// Name of the edge, always the name of its `to` topic.
  pub name: String,
  pub from: Topic,
  pub to: Topic,
  pub processor: Processor,
  pub config: EdgeConfig,
}

impl Edge {
  pub fn new(from: Topic, to: Topic, processor: Processor, config: EdgeConfig) -> Self {
    Self {
      name: to.to_string(),
      from,
      to,
      processor,
      config,
    }
  }

  /// Stable id of this edge's read position in the commit log.
  pub fn consumer_id(&self) -> String {
    format!("{}->{}", self.from, self.to)
  }

  /// Maximum number of invocations for one entry.
  pub fn max_attempts(&self) -> u32 {
    self.config.retries.unwrap_or(0).saturating_add(1)
  }

  pub fn is_terminal(&self) -> bool {
    self.to.is_terminal()
  }

  pub fn plan(&self) -> EdgePlan {
    EdgePlan {
      name: self.name.clone(),
      from: self.from.clone(),
      to: self.to.clone(),
      processor: self.processor.kind(),
      module: match &self.processor {
        Processor::Worker { module, .. } => Some(module.clone()),
        _ => None,
      },
      config: self.config.clone(),
    }
  }
}

/// Serializable description of an edge, without its processor body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgePlan {
  pub name: String,
  pub from: Topic,
  pub to: Topic,
  pub processor: ProcessorKind,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub module: Option<String>,
  pub config: EdgeConfig,
}
