use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::types::{DisabledConsumer, Entry, Output};
use crate::{CommitLog, StoreError};

#[derive(Debug, Default)]
struct State {
  topics: HashMap<String, Vec<Entry>>,
  cursors: HashMap<String, u64>,
  disabled: BTreeMap<String, DisabledConsumer>,
}

impl State {
  fn append(&mut self, topic: &str, body: serde_json::Value) -> u64 {
    let entries = self.topics.entry(topic.to_string()).or_default();
    let offset = entries.len() as u64;
    entries.push(Entry {
      topic: topic.to_string(),
      offset,
      body,
      committed_at: Utc::now(),
    });
    offset
  }
}

/// In-memory commit log.
///
/// Suitable for tests and for runs that never need to resume.
#[derive(Debug, Default)]
pub struct MemoryLog {
  state: RwLock<State>,
}

impl MemoryLog {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl CommitLog for MemoryLog {
  async fn append(&self, topic: &str, body: &serde_json::Value) -> Result<u64, StoreError> {
    Ok(self.state.write().await.append(topic, body.clone()))
  }

  async fn read(&self, topic: &str, offset: u64) -> Result<Option<Entry>, StoreError> {
    let state = self.state.read().await;
    Ok(
      state
        .topics
        .get(topic)
        .and_then(|entries| entries.get(offset as usize))
        .cloned(),
    )
  }

  async fn len(&self, topic: &str) -> Result<u64, StoreError> {
    let state = self.state.read().await;
    Ok(state.topics.get(topic).map_or(0, |e| e.len() as u64))
  }

  async fn entries(&self, topic: &str) -> Result<Vec<Entry>, StoreError> {
    let state = self.state.read().await;
    Ok(state.topics.get(topic).cloned().unwrap_or_default())
  }

  async fn cursor(&self, consumer: &str) -> Result<u64, StoreError> {
    let state = self.state.read().await;
    Ok(state.cursors.get(consumer).copied().unwrap_or(0))
  }

  async fn publish(
    &self,
    consumer: &str,
    next_offset: u64,
    outputs: &[Output],
  ) -> Result<(), StoreError> {
    let mut state = self.state.write().await;
    for output in outputs {
      state.append(&output.topic, output.body.clone());
    }
    state.cursors.insert(consumer.to_string(), next_offset);
    Ok(())
  }

  async fn disable(&self, consumer: &str, error: &str) -> Result<(), StoreError> {
    let mut state = self.state.write().await;
    state.disabled.insert(
      consumer.to_string(),
      DisabledConsumer {
        consumer: consumer.to_string(),
        error: error.to_string(),
        disabled_at: Utc::now(),
      },
    );
    Ok(())
  }

  async fn enable(&self, consumer: &str) -> Result<(), StoreError> {
    self.state.write().await.disabled.remove(consumer);
    Ok(())
  }

  async fn disabled(&self) -> Result<Vec<DisabledConsumer>, StoreError> {
    let state = self.state.read().await;
    Ok(state.disabled.values().cloned().collect())
  }

  async fn reset(&self) -> Result<(), StoreError> {
    *self.state.write().await = State::default();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_append_and_read() {
    let log = MemoryLog::new();

    assert_eq!(log.append("init", &json!({ "a": 1 })).await.unwrap(), 0);
    assert_eq!(log.append("init", &json!({ "a": 2 })).await.unwrap(), 1);
    assert_eq!(log.append("other", &json!(null)).await.unwrap(), 0);

    assert_eq!(log.len("init").await.unwrap(), 2);
    assert_eq!(log.len("missing").await.unwrap(), 0);

    let entry = log.read("init", 1).await.unwrap().unwrap();
    assert_eq!(entry.body, json!({ "a": 2 }));
    assert_eq!(entry.offset, 1);
    assert!(log.read("init", 2).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_publish_moves_cursor_and_appends() {
    let log = MemoryLog::new();
    log.append("init", &json!(1)).await.unwrap();

    assert_eq!(log.cursor("init->pre_end").await.unwrap(), 0);

    log
      .publish("init->pre_end", 1, &[Output::new("pre_end", json!(1))])
      .await
      .unwrap();

    assert_eq!(log.cursor("init->pre_end").await.unwrap(), 1);
    let entries = log.entries("pre_end").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].body, json!(1));
  }

  #[tokio::test]
  async fn test_disable_enable_and_reset() {
    let log = MemoryLog::new();
    log.disable("a->b", "boom").await.unwrap();

    let disabled = log.disabled().await.unwrap();
    assert_eq!(disabled.len(), 1);
    assert_eq!(disabled[0].error, "boom");

    log.enable("a->b").await.unwrap();
    assert!(log.disabled().await.unwrap().is_empty());

    log.append("init", &json!(1)).await.unwrap();
    log.disable("a->b", "boom").await.unwrap();
    log.reset().await.unwrap();

    assert_eq!(log.len("init").await.unwrap(), 0);
    assert!(log.disabled().await.unwrap().is_empty());
  }
}
