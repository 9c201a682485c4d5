//! Edge consumers.
//!
//! Each compiled edge runs as one [`EdgeWorker`] task. It reads its input
//! topic at its own cursor, processes one entry at a time and publishes the
//! results together with the advanced cursor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use cascade_graph::{Edge, Envelope, Processor};
use cascade_store::{CommitLog, Entry, Output};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::error::{RuntimeError, StageError};
use crate::result::StageFailure;
use crate::retry::{RetryPolicy, with_retry};
use crate::stage::{Stage, StageContext, continue_sentinel, strip_continue};

/// Shared progress counters the coordinator uses to detect a quiet graph.
///
/// `inflight` counts polls in progress. `generation` moves whenever a poll
/// changes the log, and it always moves before the poll leaves `inflight`.
#[derive(Debug, Default)]
pub(crate) struct Activity {
  generation: AtomicU64,
  inflight: AtomicUsize,
}

pub(crate) struct ActivityGuard<'a> {
  activity: &'a Activity,
}

impl Drop for ActivityGuard<'_> {
  fn drop(&mut self) {
    self.activity.inflight.fetch_sub(1, Ordering::SeqCst);
  }
}

impl Activity {
  pub(crate) fn enter(&self) -> ActivityGuard<'_> {
    self.inflight.fetch_add(1, Ordering::SeqCst);
    ActivityGuard { activity: self }
  }

  pub(crate) fn bump(&self) {
    self.generation.fetch_add(1, Ordering::SeqCst);
  }

  /// Start of a quiescence check: the current generation, if nothing is in flight.
  pub(crate) fn begin_check(&self) -> Option<u64> {
    let generation = self.generation.load(Ordering::SeqCst);
    (self.inflight.load(Ordering::SeqCst) == 0).then_some(generation)
  }

  /// End of a quiescence check started at `generation`.
  pub(crate) fn end_check(&self, generation: u64) -> bool {
    self.inflight.load(Ordering::SeqCst) == 0
      && self.generation.load(Ordering::SeqCst) == generation
  }
}

/// Settings shared by every edge of a run.
#[derive(Clone)]
pub(crate) struct EdgeShared {
  pub log: Arc<dyn CommitLog>,
  pub activity: Arc<Activity>,
  pub failures: Arc<Mutex<Vec<StageFailure>>>,
  pub store_retry: RetryPolicy,
  pub poll_interval: Duration,
  /// Bounds concurrent stage invocations across all edges.
  pub workers: Option<Arc<Semaphore>>,
}

enum Poll {
  Processed,
  Idle,
  Halted,
}

/// A processing failure that exhausted the edge's attempts.
struct Failure {
  attempts: u32,
  error: String,
}

pub(crate) struct EdgeWorker {
  edge: Edge,
  consumer: String,
  from: String,
  to: String,
  stage: Option<Arc<dyn Stage>>,
  shared: EdgeShared,
}

impl EdgeWorker {
  pub(crate) fn new(edge: Edge, stage: Option<Arc<dyn Stage>>, shared: EdgeShared) -> Self {
    Self {
      consumer: edge.consumer_id(),
      from: edge.from.to_string(),
      to: edge.to.to_string(),
      edge,
      stage,
      shared,
    }
  }

  /// Poll until `stop` fires or the edge halts.
  pub(crate) async fn run(self, stop: CancellationToken) -> Result<(), RuntimeError> {
    debug!(consumer = %self.consumer, "edge_started");

    loop {
      if stop.is_cancelled() {
        break;
      }

      match self.poll_once().await? {
        Poll::Processed => {}
        Poll::Idle => {
          tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(self.shared.poll_interval) => {}
          }
        }
        Poll::Halted => break,
      }
    }

    debug!(consumer = %self.consumer, "edge_stopped");
    Ok(())
  }

  async fn poll_once(&self) -> Result<Poll, RuntimeError> {
    let shared = &self.shared;
    let _guard = shared.activity.enter();

    let offset = with_retry(&shared.store_retry, "cursor", || {
      shared.log.cursor(&self.consumer)
    })
    .await?;
    let entry = with_retry(&shared.store_retry, "read", || {
      shared.log.read(&self.from, offset)
    })
    .await?;
    let Some(entry) = entry else {
      return Ok(Poll::Idle);
    };

    let outputs = match self.process(&entry).await {
      Ok(outputs) => outputs,
      Err(failure) => {
        self.halt(offset, failure).await?;
        return Ok(Poll::Halted);
      }
    };

    with_retry(&shared.store_retry, "publish", || {
      shared.log.publish(&self.consumer, offset + 1, &outputs)
    })
    .await?;
    shared.activity.bump();

    Ok(Poll::Processed)
  }

  async fn process(&self, entry: &Entry) -> Result<Vec<Output>, Failure> {
    match &self.edge.processor {
      Processor::Glue(glue) => glue(&entry.body)
        .map(|body| vec![Output::new(self.to.as_str(), body)])
        .map_err(|e| Failure {
          attempts: 1,
          error: format!("failed to build envelope: {}", e),
        }),
      Processor::Finish => Ok(vec![Output::new(self.to.as_str(), entry.body.clone())]),
      Processor::Worker { module, .. } => self.invoke(module, entry).await,
    }
  }

  /// Run the stage for one entry, retrying up to the edge's budget.
  #[instrument(
    name = "stage_invoke",
    skip(self, entry),
    fields(
      stage = %self.edge.name,
      offset = entry.offset,
    )
  )]
  async fn invoke(&self, module: &str, entry: &Entry) -> Result<Vec<Output>, Failure> {
    let envelope: Envelope = serde_json::from_value(entry.body.clone()).map_err(|e| Failure {
      attempts: 0,
      error: format!("invalid envelope: {}", e),
    })?;
    let Some(stage) = &self.stage else {
      return Err(Failure {
        attempts: 0,
        error: format!("no stage registered for module '{}'", module),
      });
    };

    let _permit = match &self.shared.workers {
      Some(workers) => workers.acquire().await.ok(),
      None => None,
    };

    let mut input = envelope.input.clone();
    strip_continue(&mut input);

    let max_attempts = self.edge.max_attempts();
    let mut last_error = None;

    for attempt in 0..max_attempts {
      let mut ctx = StageContext::new(envelope.clone(), attempt);
      let call = stage.run(&mut ctx, input.clone(), envelope.params.clone());
      let result = match self.edge.config.timeout_ms {
        Some(timeout_ms) => tokio::time::timeout(Duration::from_millis(timeout_ms), call)
          .await
          .unwrap_or_else(|_| Err(StageError::Timeout { timeout_ms })),
        None => call.await,
      };

      match result {
        Ok(returned) => {
          if let Some(value) = returned {
            ctx.yield_value(value);
          }
          if !ctx.has_yielded() {
            ctx.yield_value(continue_sentinel());
          }
          debug!(attempt, "stage_completed");
          return self.outputs(&envelope, ctx);
        }
        Err(e) => {
          warn!(attempt, max_attempts, error = %e, "stage_attempt_failed");
          last_error = Some(e);
        }
      }
    }

    Err(Failure {
      attempts: max_attempts,
      error: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
  }

  /// Yields go to the edge's output topic. Recursive yields go back to its
  /// input topic, wrapped in a copy of the envelope that produced them.
  fn outputs(&self, envelope: &Envelope, ctx: StageContext) -> Result<Vec<Output>, Failure> {
    let (yields, recursive) = ctx.into_yields();

    let mut outputs: Vec<Output> = yields
      .into_iter()
      .map(|value| Output::new(self.to.as_str(), value))
      .collect();

    for input in recursive {
      let body = serde_json::to_value(envelope.with_input(input)).map_err(|e| Failure {
        attempts: 1,
        error: format!("failed to encode recursive yield: {}", e),
      })?;
      outputs.push(Output::new(self.from.as_str(), body));
    }

    Ok(outputs)
  }

  async fn halt(&self, offset: u64, failure: Failure) -> Result<(), RuntimeError> {
    let shared = &self.shared;

    error!(
      consumer = %self.consumer,
      stage = %self.edge.name,
      offset,
      attempts = failure.attempts,
      error = %failure.error,
      "stage_failed"
    );

    with_retry(&shared.store_retry, "disable", || {
      shared.log.disable(&self.consumer, &failure.error)
    })
    .await?;
    shared.activity.bump();

    let module = match &self.edge.processor {
      Processor::Worker { module, .. } => Some(module.clone()),
      _ => None,
    };
    shared.failures.lock().await.push(StageFailure {
      consumer: self.consumer.clone(),
      stage: self.edge.name.clone(),
      module,
      offset,
      attempts: failure.attempts,
      error: failure.error,
    });

    Ok(())
  }
}
