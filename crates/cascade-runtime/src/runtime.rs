//! Pipeline runtime.
//!
//! The [`Runtime`] struct is the main entry point for executing pipelines.
//! It owns the compiled edges, the stage registry and the commit log, and
//! provides `run(input, options, cancel)` to drive the graph until it goes
//! quiet.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cascade_config::{GlobalConfig, Pipeline};
use cascade_graph::{Compilation, Processor, RunContext, Topic, compile_pipeline};
use cascade_store::CommitLog;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::RuntimeError;
use crate::result::{RunOutcome, RunSummary};
use crate::retry::{RetryPolicy, with_retry};
use crate::stage::StageRegistry;
use crate::worker::{Activity, EdgeShared, EdgeWorker};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// How long idle edges and the coordinator sleep between polls.
  pub poll_interval: Duration,
  /// Backoff applied to commit-log calls.
  pub store_retry: RetryPolicy,
  /// Upper bound on concurrent stage invocations. `None` means one per edge.
  pub workers: Option<usize>,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      poll_interval: DEFAULT_POLL_INTERVAL,
      store_retry: RetryPolicy::default(),
      workers: None,
    }
  }
}

impl RuntimeConfig {
  /// Settings taken from a pipeline's global `config` block.
  pub fn from_global(config: &GlobalConfig) -> Self {
    Self {
      poll_interval: config
        .poll_interval_ms
        .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis),
      workers: config.workers,
      ..Self::default()
    }
  }
}

/// How a run treats state left in the log by earlier runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
  /// Keep cursors and topics instead of starting over.
  pub resume: bool,
  /// On resume, give disabled stages another go at the entry they failed on.
  pub restart_disabled_steps: bool,
}

impl RunOptions {
  pub fn fresh() -> Self {
    Self::default()
  }

  pub fn resume() -> Self {
    Self {
      resume: true,
      restart_disabled_steps: false,
    }
  }

  pub fn with_restart_disabled_steps(mut self) -> Self {
    self.restart_disabled_steps = true;
    self
  }
}

/// Why the coordinator stopped waiting.
enum Settled {
  Quiescent,
  Cancelled,
  /// An edge task gave up; its error is collected when tasks are joined.
  Aborted,
}

/// The pipeline runtime.
pub struct Runtime {
  compilation: Compilation,
  ctx: Arc<RunContext>,
  registry: StageRegistry,
  log: Arc<dyn CommitLog>,
  config: RuntimeConfig,
}

impl Runtime {
  /// Compile `pipeline` and check that every module it uses is registered.
  pub fn new(
    pipeline: &Pipeline,
    ctx: Arc<RunContext>,
    registry: StageRegistry,
    log: Arc<dyn CommitLog>,
  ) -> Result<Self, RuntimeError> {
    let compilation = compile_pipeline(pipeline, ctx.clone())?;

    for edge in compilation.edges() {
      if let Processor::Worker { module, .. } = &edge.processor
        && !registry.contains(module)
      {
        return Err(RuntimeError::UnknownModule {
          module: module.clone(),
          stage: edge.name.clone(),
        });
      }
    }

    for topic in compilation.graph().dangling() {
      warn!(topic = %topic, "topic_never_fed");
    }

    Ok(Self {
      compilation,
      ctx,
      registry,
      log,
      config: RuntimeConfig::from_global(&pipeline.config),
    })
  }

  pub fn with_config(mut self, config: RuntimeConfig) -> Self {
    self.config = config;
    self
  }

  pub fn compilation(&self) -> &Compilation {
    &self.compilation
  }

  pub fn context(&self) -> &RunContext {
    &self.ctx
  }

  /// Run the pipeline with `input` seeded on its init topics.
  #[instrument(
    name = "runtime_run",
    skip(self, input, cancel),
    fields(
      operation_id = %self.ctx.operation_id,
      resume = options.resume,
    )
  )]
  pub async fn run(
    &self,
    input: serde_json::Value,
    options: RunOptions,
    cancel: CancellationToken,
  ) -> Result<RunSummary, RuntimeError> {
    info!(
      operation_id = %self.ctx.operation_id,
      edges = self.compilation.edges().len(),
      skipped = self.compilation.skipped().len(),
      "run_started"
    );

    self.prepare(&input, options).await?;

    let disabled: HashSet<String> = self
      .log
      .disabled()
      .await?
      .into_iter()
      .map(|d| d.consumer)
      .collect();

    let activity = Arc::new(Activity::default());
    let shared = EdgeShared {
      log: self.log.clone(),
      activity: activity.clone(),
      failures: Arc::new(Mutex::new(Vec::new())),
      store_retry: self.config.store_retry.clone(),
      poll_interval: self.config.poll_interval,
      workers: self.config.workers.map(|n| Arc::new(Semaphore::new(n.max(1)))),
    };

    // Cancelling the run stops every edge; an edge that fails stops the rest
    // without touching the caller's token.
    let stop = cancel.child_token();
    let mut handles = Vec::new();

    for edge in self.compilation.edges() {
      let consumer = edge.consumer_id();
      if disabled.contains(&consumer) {
        warn!(consumer = %consumer, "edge_disabled");
        continue;
      }

      let stage = match &edge.processor {
        Processor::Worker { module, .. } => self.registry.get(module),
        _ => None,
      };
      let worker = EdgeWorker::new(edge.clone(), stage, shared.clone());
      let stop = stop.clone();

      let handle = tokio::spawn(async move {
        let result = worker.run(stop.clone()).await;
        if result.is_err() {
          stop.cancel();
        }
        result
      });
      handles.push((consumer, handle));
    }

    let settled = self.coordinate(&activity, &stop, &cancel).await;
    stop.cancel();

    let (consumers, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    let joined = futures::future::join_all(handles).await;

    for (consumer, result) in consumers.into_iter().zip(joined) {
      let failure = match result {
        Ok(Ok(())) => continue,
        Ok(Err(e)) => e,
        Err(e) => RuntimeError::EdgeTask {
          edge: consumer,
          message: e.to_string(),
        },
      };
      error!(operation_id = %self.ctx.operation_id, error = %failure, "run_failed");
      return Err(failure);
    }

    let outcome = match settled? {
      Settled::Cancelled => {
        warn!(operation_id = %self.ctx.operation_id, "run_cancelled");
        RunOutcome::Cancelled
      }
      Settled::Quiescent | Settled::Aborted => self.outcome().await?,
    };

    let terminal = self
      .log
      .entries(&Topic::terminal().to_string())
      .await?
      .into_iter()
      .map(|entry| entry.body)
      .collect();
    let failures = std::mem::take(&mut *shared.failures.lock().await);
    let disabled = self.log.disabled().await?;

    info!(
      operation_id = %self.ctx.operation_id,
      outcome = ?outcome,
      failures = failures.len(),
      "run_finished"
    );

    Ok(RunSummary {
      operation_id: self.ctx.operation_id.clone(),
      outcome,
      terminal,
      failures,
      disabled,
    })
  }

  /// Reset or reuse the log, then seed the init topics.
  async fn prepare(
    &self,
    input: &serde_json::Value,
    options: RunOptions,
  ) -> Result<(), RuntimeError> {
    let retry = &self.config.store_retry;
    let log = &self.log;

    if !options.resume {
      with_retry(retry, "reset", || log.reset()).await?;
    } else if options.restart_disabled_steps {
      for disabled in log.disabled().await? {
        info!(
          consumer = %disabled.consumer,
          error = %disabled.error,
          "disabled_step_restarted"
        );
        with_retry(retry, "enable", || log.enable(&disabled.consumer)).await?;
      }
    }

    for topic in self.compilation.init_topics() {
      let name = topic.to_string();
      if options.resume && log.len(&name).await? > 0 {
        debug!(topic = %name, "init_already_seeded");
        continue;
      }
      with_retry(retry, "seed", || log.append(&name, input)).await?;
    }

    Ok(())
  }

  /// Wait until the graph is quiet, the run is cancelled, or an edge fails.
  async fn coordinate(
    &self,
    activity: &Activity,
    stop: &CancellationToken,
    cancel: &CancellationToken,
  ) -> Result<Settled, RuntimeError> {
    loop {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(Settled::Cancelled),
        _ = stop.cancelled() => return Ok(Settled::Aborted),
        _ = tokio::time::sleep(self.config.poll_interval) => {}
      }

      if self.is_quiescent(activity).await? {
        debug!(operation_id = %self.ctx.operation_id, "graph_quiescent");
        return Ok(Settled::Quiescent);
      }
    }
  }

  /// True when every live edge has drained its input and nothing changed the
  /// log while that was being checked.
  async fn is_quiescent(&self, activity: &Activity) -> Result<bool, RuntimeError> {
    let Some(generation) = activity.begin_check() else {
      return Ok(false);
    };

    let disabled: HashSet<String> = self
      .log
      .disabled()
      .await?
      .into_iter()
      .map(|d| d.consumer)
      .collect();

    for edge in self.compilation.edges() {
      let consumer = edge.consumer_id();
      if disabled.contains(&consumer) {
        continue;
      }
      let cursor = self.log.cursor(&consumer).await?;
      if cursor < self.log.len(&edge.from.to_string()).await? {
        return Ok(false);
      }
    }

    Ok(activity.end_check(generation))
  }

  /// Completed when no branch is halted and every terminal edge delivered.
  async fn outcome(&self) -> Result<RunOutcome, RuntimeError> {
    if !self.log.disabled().await?.is_empty() {
      return Ok(RunOutcome::Halted);
    }

    for edge in self.compilation.terminal_edges() {
      if self.log.cursor(&edge.consumer_id()).await? == 0 {
        warn!(consumer = %edge.consumer_id(), "terminal_not_reached");
        return Ok(RunOutcome::Halted);
      }
    }

    Ok(RunOutcome::Completed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use cascade_config::{StageType, Step};
  use cascade_store::MemoryLog;

  fn context() -> Arc<RunContext> {
    Arc::new(RunContext::new("/tmp/project", "/opt/cascade").with_operation_id("op-test"))
  }

  #[test]
  fn test_unknown_module_is_rejected() {
    let pipeline = Pipeline::waterfall(vec![
      Step::new(StageType::Script, "passthrough"),
      Step::new(StageType::Scraper, "missing"),
    ]);

    let result = Runtime::new(
      &pipeline,
      context(),
      StageRegistry::with_builtins(),
      Arc::new(MemoryLog::new()),
    );

    match result {
      Err(RuntimeError::UnknownModule { module, stage }) => {
        assert_eq!(module, "missing");
        assert_eq!(stage, "waterfall_1");
      }
      other => panic!("expected UnknownModule, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn test_invalid_topology_is_rejected() {
    let pipeline = Pipeline::default();

    let result = Runtime::new(
      &pipeline,
      context(),
      StageRegistry::with_builtins(),
      Arc::new(MemoryLog::new()),
    );

    assert!(matches!(result, Err(RuntimeError::Topology(_))));
  }

  #[test]
  fn test_config_from_global() {
    let global = GlobalConfig {
      workers: Some(4),
      poll_interval_ms: Some(5),
      ..GlobalConfig::default()
    };

    let config = RuntimeConfig::from_global(&global);
    assert_eq!(config.poll_interval, Duration::from_millis(5));
    assert_eq!(config.workers, Some(4));

    let config = RuntimeConfig::from_global(&GlobalConfig::default());
    assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
    assert_eq!(config.workers, None);
  }

  #[test]
  fn test_run_options() {
    assert!(!RunOptions::fresh().resume);
    let options = RunOptions::resume().with_restart_disabled_steps();
    assert!(options.resume);
    assert!(options.restart_disabled_steps);
  }
}
