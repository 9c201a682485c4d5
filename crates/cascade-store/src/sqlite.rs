use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};

use crate::types::{DisabledConsumer, Entry, Output};
use crate::{CommitLog, StoreError};

/// SQLite-based commit log.
pub struct SqliteLog {
  pool: SqlitePool,
}

#[derive(FromRow)]
struct EntryRow {
  topic: String,
  seq: i64,
  body: Json<serde_json::Value>,
  committed_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for Entry {
  type Error = StoreError;

  fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
    let offset = u64::try_from(row.seq).map_err(|_| StoreError::InvalidOffset {
      topic: row.topic.clone(),
      offset: row.seq,
    })?;
    Ok(Entry {
      topic: row.topic,
      offset,
      body: row.body.0,
      committed_at: row.committed_at,
    })
  }
}

#[derive(FromRow)]
struct DisabledRow {
  consumer: String,
  error: String,
  disabled_at: DateTime<Utc>,
}

impl SqliteLog {
  /// Create a new SQLite log with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) a log file and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
      .max_connections(4)
      .connect_with(options)
      .await?;

    let log = Self::new(pool);
    log.migrate().await?;
    Ok(log)
  }

  /// An in-memory database on a single, never-recycled connection.
  pub async fn in_memory() -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .min_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect_with(options)
      .await?;

    let log = Self::new(pool);
    log.migrate().await?;
    Ok(log)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }

  /// Close the underlying pool.
  pub async fn close(&self) {
    self.pool.close().await;
  }

  async fn append_in(
    tx: &mut Transaction<'_, Sqlite>,
    topic: &str,
    body: &serde_json::Value,
  ) -> Result<i64, StoreError> {
    let seq: i64 = sqlx::query_scalar(
      r#"
      INSERT INTO log_entries (topic, seq, body, committed_at)
      SELECT ?, COALESCE(MAX(seq) + 1, 0), ?, ?
      FROM log_entries
      WHERE topic = ?
      RETURNING seq
      "#,
    )
    .bind(topic)
    .bind(Json(body))
    .bind(Utc::now())
    .bind(topic)
    .fetch_one(&mut **tx)
    .await?;

    Ok(seq)
  }
}

fn to_i64(offset: u64) -> i64 {
  i64::try_from(offset).unwrap_or(i64::MAX)
}

#[async_trait]
impl CommitLog for SqliteLog {
  async fn append(&self, topic: &str, body: &serde_json::Value) -> Result<u64, StoreError> {
    let mut tx = self.pool.begin().await?;
    let seq = Self::append_in(&mut tx, topic, body).await?;
    tx.commit().await?;

    u64::try_from(seq).map_err(|_| StoreError::InvalidOffset {
      topic: topic.to_string(),
      offset: seq,
    })
  }

  async fn read(&self, topic: &str, offset: u64) -> Result<Option<Entry>, StoreError> {
    let row: Option<EntryRow> = sqlx::query_as(
      r#"
      SELECT topic, seq, body, committed_at
      FROM log_entries
      WHERE topic = ? AND seq = ?
      "#,
    )
    .bind(topic)
    .bind(to_i64(offset))
    .fetch_optional(&self.pool)
    .await?;

    row.map(Entry::try_from).transpose()
  }

  async fn len(&self, topic: &str) -> Result<u64, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM log_entries WHERE topic = ?")
      .bind(topic)
      .fetch_one(&self.pool)
      .await?;

    Ok(u64::try_from(count).unwrap_or(0))
  }

  async fn entries(&self, topic: &str) -> Result<Vec<Entry>, StoreError> {
    let rows: Vec<EntryRow> = sqlx::query_as(
      r#"
      SELECT topic, seq, body, committed_at
      FROM log_entries
      WHERE topic = ?
      ORDER BY seq ASC
      "#,
    )
    .bind(topic)
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(Entry::try_from).collect()
  }

  async fn cursor(&self, consumer: &str) -> Result<u64, StoreError> {
    let next: Option<i64> =
      sqlx::query_scalar("SELECT next_offset FROM consumer_cursors WHERE consumer = ?")
        .bind(consumer)
        .fetch_optional(&self.pool)
        .await?;

    Ok(next.and_then(|n| u64::try_from(n).ok()).unwrap_or(0))
  }

  async fn publish(
    &self,
    consumer: &str,
    next_offset: u64,
    outputs: &[Output],
  ) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;

    for output in outputs {
      Self::append_in(&mut tx, &output.topic, &output.body).await?;
    }

    sqlx::query(
      r#"
      INSERT INTO consumer_cursors (consumer, next_offset)
      VALUES (?, ?)
      ON CONFLICT(consumer) DO UPDATE SET next_offset = excluded.next_offset
      "#,
    )
    .bind(consumer)
    .bind(to_i64(next_offset))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
  }

  async fn disable(&self, consumer: &str, error: &str) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO disabled_consumers (consumer, error, disabled_at)
      VALUES (?, ?, ?)
      ON CONFLICT(consumer) DO UPDATE SET error = excluded.error, disabled_at = excluded.disabled_at
      "#,
    )
    .bind(consumer)
    .bind(error)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn enable(&self, consumer: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM disabled_consumers WHERE consumer = ?")
      .bind(consumer)
      .execute(&self.pool)
      .await?;

    Ok(())
  }

  async fn disabled(&self) -> Result<Vec<DisabledConsumer>, StoreError> {
    let rows: Vec<DisabledRow> = sqlx::query_as(
      r#"
      SELECT consumer, error, disabled_at
      FROM disabled_consumers
      ORDER BY consumer ASC
      "#,
    )
    .fetch_all(&self.pool)
    .await?;

    Ok(
      rows
        .into_iter()
        .map(|row| DisabledConsumer {
          consumer: row.consumer,
          error: row.error,
          disabled_at: row.disabled_at,
        })
        .collect(),
    )
  }

  async fn reset(&self) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;
    for table in ["log_entries", "consumer_cursors", "disabled_consumers"] {
      sqlx::query(&format!("DELETE FROM {}", table))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
  }
}
