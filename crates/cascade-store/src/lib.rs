//! Cascade Store
//!
//! This crate provides the commit-log substrate the execution driver runs on.
//! A log is a set of named, append-only topics plus per-consumer read cursors:
//!
//! - Topics are created implicitly on first append and are never mutated.
//! - Each compiled edge is a consumer with one cursor on its input topic.
//! - Publishing an edge's outputs and advancing its cursor is one atomic step,
//!   so a resumed run neither loses nor duplicates work.
//! - Consumers that exhaust their retry budget are disabled, which halts that
//!   branch until a run restarts disabled steps.
//!
//! [`SqliteLog`] is durable and is what resumable runs use; [`MemoryLog`] keeps
//! everything in process for tests and throwaway runs.

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryLog;
pub use sqlite::SqliteLog;
pub use types::{DisabledConsumer, Entry, Output};

use async_trait::async_trait;

/// Error type for commit-log operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Schema migration failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  /// A stored offset does not fit the API's offset type.
  #[error("invalid offset {offset} in topic '{topic}'")]
  InvalidOffset { topic: String, offset: i64 },
}

/// Storage trait for topics, consumer cursors and disabled consumers.
#[async_trait]
pub trait CommitLog: Send + Sync {
  /// Append an entry to a topic and return its offset.
  async fn append(&self, topic: &str, body: &serde_json::Value) -> Result<u64, StoreError>;

  /// Read the entry at `offset`, if it has been committed.
  async fn read(&self, topic: &str, offset: u64) -> Result<Option<Entry>, StoreError>;

  /// Number of entries committed to a topic.
  async fn len(&self, topic: &str) -> Result<u64, StoreError>;

  /// All entries of a topic, in commit order.
  async fn entries(&self, topic: &str) -> Result<Vec<Entry>, StoreError>;

  /// Next offset the consumer will read. Zero for an unknown consumer.
  async fn cursor(&self, consumer: &str) -> Result<u64, StoreError>;

  /// Atomically append `outputs` and move the consumer's cursor to `next_offset`.
  async fn publish(
    &self,
    consumer: &str,
    next_offset: u64,
    outputs: &[Output],
  ) -> Result<(), StoreError>;

  /// Halt a consumer, recording why.
  async fn disable(&self, consumer: &str, error: &str) -> Result<(), StoreError>;

  /// Lift a halt. A no-op for consumers that are not disabled.
  async fn enable(&self, consumer: &str) -> Result<(), StoreError>;

  /// All currently disabled consumers.
  async fn disabled(&self) -> Result<Vec<DisabledConsumer>, StoreError>;

  /// Drop every topic, cursor and halt.
  async fn reset(&self) -> Result<(), StoreError>;
}
