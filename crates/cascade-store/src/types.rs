use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
  pub topic: String,
  pub offset: u64,
  pub body: serde_json::Value,
  pub committed_at: DateTime<Utc>,
}

/// An entry to be appended as part of a consumer's publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
  pub topic: String,
  pub body: serde_json::Value,
}

impl Output {
  pub fn new(topic: impl Into<String>, body: serde_json::Value) -> Self {
    Self {
      topic: topic.into(),
      body,
    }
  }
}

/// A consumer halted after its stage exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisabledConsumer {
  pub consumer: String,
  pub error: String,
  pub disabled_at: DateTime<Utc>,
}
