//! End-to-end tests for Runtime::run over in-memory and SQLite logs.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cascade_config::{Pipeline, StageType, Step};
use cascade_graph::RunContext;
use cascade_runtime::{
  RetryPolicy, RunOptions, RunOutcome, RunSummary, Runtime, RuntimeConfig, Stage, StageContext,
  StageError, StageRegistry,
};
use cascade_store::{CommitLog, MemoryLog, SqliteLog};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn context() -> Arc<RunContext> {
  Arc::new(
    RunContext::new("/tmp/project", "/opt/cascade")
      .with_operation_id("op-test")
      .with_connection_config(json!({ "port": 9222 })),
  )
}

fn fast() -> RuntimeConfig {
  RuntimeConfig {
    poll_interval: Duration::from_millis(5),
    store_retry: RetryPolicy::none(),
    workers: None,
  }
}

fn script(module: &str) -> Step {
  Step::new(StageType::Script, module)
}

fn runtime(pipeline: &Pipeline, registry: StageRegistry, log: Arc<dyn CommitLog>) -> Runtime {
  Runtime::new(pipeline, context(), registry, log)
    .unwrap()
    .with_config(fast())
}

async fn run(runtime: &Runtime, input: Value, options: RunOptions) -> RunSummary {
  tokio::time::timeout(
    Duration::from_secs(10),
    runtime.run(input, options, CancellationToken::new()),
  )
  .await
  .expect("run timed out")
  .unwrap()
}

fn sorted(mut values: Vec<Value>) -> Vec<Value> {
  values.sort_by_key(|v| v.to_string());
  values
}

/// Records every input it sees and yields nothing.
#[derive(Default, Clone)]
struct Recorder {
  seen: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Stage for Recorder {
  async fn run(
    &self,
    _ctx: &mut StageContext,
    input: Value,
    _params: Value,
  ) -> Result<Option<Value>, StageError> {
    self.seen.lock().unwrap().push(input);
    Ok(None)
  }
}

/// Fails until `fail_first` attempts have been made for an entry.
struct Flaky {
  fail_first: u32,
  retries_seen: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl Stage for Flaky {
  async fn run(
    &self,
    ctx: &mut StageContext,
    input: Value,
    _params: Value,
  ) -> Result<Option<Value>, StageError> {
    self.retries_seen.lock().unwrap().push(ctx.current_retry());
    // Output of a failed attempt must never reach the log.
    ctx.yield_value(json!({ "attempt": ctx.current_retry() }));
    if ctx.current_retry() < self.fail_first {
      return Err(StageError::failed("not yet"));
    }
    Ok(Some(input))
  }
}

/// Fails while `broken` is set.
struct Switch {
  broken: Arc<AtomicBool>,
  calls: Arc<AtomicU32>,
}

#[async_trait]
impl Stage for Switch {
  async fn run(
    &self,
    _ctx: &mut StageContext,
    input: Value,
    _params: Value,
  ) -> Result<Option<Value>, StageError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.broken.load(Ordering::SeqCst) {
      return Err(StageError::failed("switch is off"));
    }
    Ok(Some(json!({ "switched": input })))
  }
}

/// Walks pages 1..=`last` by feeding the next page back into itself.
struct Paginate {
  last: u64,
}

#[async_trait]
impl Stage for Paginate {
  async fn run(
    &self,
    ctx: &mut StageContext,
    input: Value,
    _params: Value,
  ) -> Result<Option<Value>, StageError> {
    let page = input["page"]
      .as_u64()
      .ok_or_else(|| StageError::failed("missing page"))?;
    if page < self.last {
      ctx.recursive_yield(json!({ "page": page + 1 }));
    }
    ctx.yield_each(vec![json!({ "row": page * 10 }), json!({ "row": page * 10 + 1 })]);
    Ok(None)
  }
}

struct Sleepy {
  delay: Duration,
}

#[async_trait]
impl Stage for Sleepy {
  async fn run(
    &self,
    _ctx: &mut StageContext,
    input: Value,
    _params: Value,
  ) -> Result<Option<Value>, StageError> {
    tokio::time::sleep(self.delay).await;
    Ok(Some(input))
  }
}

/// Re-feeds its input forever.
struct Forever;

#[async_trait]
impl Stage for Forever {
  async fn run(
    &self,
    ctx: &mut StageContext,
    input: Value,
    _params: Value,
  ) -> Result<Option<Value>, StageError> {
    tokio::time::sleep(Duration::from_millis(2)).await;
    ctx.recursive_yield(input);
    Ok(None)
  }
}

/// Yields the connection config it was handed, if any.
struct Connection;

#[async_trait]
impl Stage for Connection {
  async fn run(
    &self,
    ctx: &mut StageContext,
    _input: Value,
    _params: Value,
  ) -> Result<Option<Value>, StageError> {
    Ok(Some(ctx.connection_config().cloned().unwrap_or(Value::Null)))
  }
}

#[tokio::test]
async fn test_waterfall_runs_to_completion() {
  let pipeline = Pipeline::waterfall(vec![script("passthrough"), script("log")]);
  let log = Arc::new(MemoryLog::new());
  let runtime = runtime(&pipeline, StageRegistry::with_builtins(), log.clone());

  let summary = run(&runtime, json!({ "url": "https://example.com" }), RunOptions::fresh()).await;

  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert_eq!(summary.operation_id, "op-test");
  assert_eq!(summary.terminal, vec![json!({ "url": "https://example.com" })]);
  assert!(summary.failures.is_empty());

  let envelopes = log.entries("pre_waterfall_1").await.unwrap();
  assert_eq!(envelopes.len(), 1);
  assert_eq!(envelopes[0].body["saveTopic"], "waterfall_1");
  assert_eq!(envelopes[0].body["module"], "log");
}

#[tokio::test]
async fn test_parallel_branches_run_independently() {
  let pipeline = Pipeline::parallel(vec![script("passthrough"), script("log")]);
  let log = Arc::new(MemoryLog::new());
  let runtime = runtime(&pipeline, StageRegistry::with_builtins(), log.clone());

  let summary = run(&runtime, json!({ "n": 1 }), RunOptions::fresh()).await;

  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert_eq!(summary.terminal, vec![json!({ "n": 1 }), json!({ "n": 1 })]);
  assert_eq!(log.len("init_0").await.unwrap(), 1);
  assert_eq!(log.len("init_1").await.unwrap(), 1);
  assert_eq!(log.len("subwaterfall_0").await.unwrap(), 1);
  assert_eq!(log.len("subwaterfall_1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_nested_parallel_children_receive_owner_output() {
  let pipeline = Pipeline::waterfall(vec![
    script("passthrough"),
    script("passthrough").with_parallel(vec![script("log"), script("log")]),
    script("passthrough"),
  ]);
  let log = Arc::new(MemoryLog::new());
  let runtime = runtime(&pipeline, StageRegistry::with_builtins(), log.clone());

  let summary = run(&runtime, json!("seed"), RunOptions::fresh()).await;

  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert_eq!(summary.terminal, vec![json!("seed")]);
  for topic in ["waterfall_1_parallel_0", "waterfall_1_parallel_1", "waterfall_2"] {
    assert_eq!(log.len(topic).await.unwrap(), 1, "topic {}", topic);
  }
}

#[tokio::test]
async fn test_retries_until_success() {
  let retries_seen = Arc::new(Mutex::new(Vec::new()));
  let registry = StageRegistry::new().with(
    "flaky",
    Flaky {
      fail_first: 2,
      retries_seen: retries_seen.clone(),
    },
  );
  let pipeline = Pipeline::waterfall(vec![script("flaky").with_retries(2)]);
  let runtime = runtime(&pipeline, registry, Arc::new(MemoryLog::new()));

  let summary = run(&runtime, json!({ "id": 7 }), RunOptions::fresh()).await;

  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert_eq!(*retries_seen.lock().unwrap(), vec![0, 1, 2]);
  // Only the successful attempt's yields are committed.
  assert_eq!(summary.terminal, vec![json!({ "attempt": 2 }), json!({ "id": 7 })]);
}

#[tokio::test]
async fn test_exhausted_retries_halt_only_that_branch() {
  let retries_seen = Arc::new(Mutex::new(Vec::new()));
  let registry = StageRegistry::with_builtins().with(
    "flaky",
    Flaky {
      fail_first: u32::MAX,
      retries_seen: retries_seen.clone(),
    },
  );
  let pipeline = Pipeline::parallel(vec![script("flaky").with_retries(1), script("passthrough")]);
  let runtime = runtime(&pipeline, registry, Arc::new(MemoryLog::new()));

  let summary = run(&runtime, json!({ "ok": true }), RunOptions::fresh()).await;

  assert_eq!(summary.outcome, RunOutcome::Halted);
  assert_eq!(summary.terminal, vec![json!({ "ok": true })]);
  assert_eq!(*retries_seen.lock().unwrap(), vec![0, 1]);

  assert_eq!(summary.failures.len(), 1);
  let failure = &summary.failures[0];
  assert_eq!(failure.stage, "subwaterfall_0");
  assert_eq!(failure.consumer, "pre_subwaterfall_0->subwaterfall_0");
  assert_eq!(failure.module.as_deref(), Some("flaky"));
  assert_eq!(failure.attempts, 2);
  assert_eq!(failure.error, "not yet");

  assert_eq!(summary.disabled.len(), 1);
  assert_eq!(summary.disabled[0].consumer, failure.consumer);
}

#[tokio::test]
async fn test_continue_sentinel_is_emitted_and_stripped() {
  let first = Recorder::default();
  let second = Recorder::default();
  let registry = StageRegistry::new()
    .with("first", first.clone())
    .with("second", second.clone());
  let pipeline = Pipeline::waterfall(vec![script("first"), script("second")]);
  let runtime = runtime(&pipeline, registry, Arc::new(MemoryLog::new()));

  let summary = run(&runtime, json!({ "continue": true, "keep": 1 }), RunOptions::fresh()).await;

  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert_eq!(*first.seen.lock().unwrap(), vec![json!({ "keep": 1 })]);
  assert_eq!(*second.seen.lock().unwrap(), vec![json!({})]);
  assert_eq!(summary.terminal, vec![json!({ "continue": true })]);
}

#[tokio::test]
async fn test_recursive_yield_reenters_own_input() {
  let registry = StageRegistry::new().with("paginate", Paginate { last: 3 });
  let pipeline = Pipeline::waterfall(vec![script("paginate")]);
  let log = Arc::new(MemoryLog::new());
  let runtime = runtime(&pipeline, registry, log.clone());

  let summary = run(&runtime, json!({ "page": 1 }), RunOptions::fresh()).await;

  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert_eq!(
    summary.terminal,
    vec![
      json!({ "row": 10 }),
      json!({ "row": 11 }),
      json!({ "row": 20 }),
      json!({ "row": 21 }),
      json!({ "row": 30 }),
      json!({ "row": 31 }),
    ]
  );

  let inputs: Vec<Value> = log
    .entries("pre_waterfall_0")
    .await
    .unwrap()
    .into_iter()
    .map(|e| e.body["input"].clone())
    .collect();
  assert_eq!(inputs, vec![json!({ "page": 1 }), json!({ "page": 2 }), json!({ "page": 3 })]);
}

#[tokio::test]
async fn test_attempt_timeout_counts_as_failure() {
  let registry = StageRegistry::new().with(
    "sleepy",
    Sleepy {
      delay: Duration::from_secs(5),
    },
  );
  let mut step = script("sleepy");
  step.config.timeout_ms = Some(20);
  let pipeline = Pipeline::waterfall(vec![step]);
  let runtime = runtime(&pipeline, registry, Arc::new(MemoryLog::new()));

  let summary = run(&runtime, json!({}), RunOptions::fresh()).await;

  assert_eq!(summary.outcome, RunOutcome::Halted);
  assert_eq!(summary.failures[0].error, "stage timed out after 20ms");
  assert!(summary.terminal.is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
  let registry = StageRegistry::new().with("forever", Forever);
  let pipeline = Pipeline::waterfall(vec![script("forever")]);
  let runtime = runtime(&pipeline, registry, Arc::new(MemoryLog::new()));

  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(100)).await;
    trigger.cancel();
  });

  let summary = tokio::time::timeout(
    Duration::from_secs(10),
    runtime.run(json!({ "loop": true }), RunOptions::fresh(), cancel),
  )
  .await
  .expect("run did not stop after cancellation")
  .unwrap();

  assert_eq!(summary.outcome, RunOutcome::Cancelled);
  assert!(summary.terminal.is_empty());
}

#[tokio::test]
async fn test_scrapers_receive_connection_config() {
  let registry = StageRegistry::new().with("connection", Connection);
  let pipeline = Pipeline::parallel(vec![
    Step::new(StageType::Scraper, "connection"),
    script("connection"),
  ]);
  let runtime = runtime(&pipeline, registry, Arc::new(MemoryLog::new()));

  let summary = run(&runtime, json!({}), RunOptions::fresh()).await;

  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert_eq!(sorted(summary.terminal), sorted(vec![json!({ "port": 9222 }), Value::Null]));
}

#[tokio::test]
async fn test_worker_limit_still_completes() {
  let registry = StageRegistry::new().with(
    "sleepy",
    Sleepy {
      delay: Duration::from_millis(10),
    },
  );
  let pipeline = Pipeline::parallel(vec![script("sleepy"), script("sleepy"), script("sleepy")]);
  let runtime = Runtime::new(&pipeline, context(), registry, Arc::new(MemoryLog::new()))
    .unwrap()
    .with_config(RuntimeConfig {
      workers: Some(1),
      ..fast()
    });

  let summary = run(&runtime, json!(1), RunOptions::fresh()).await;

  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert_eq!(summary.terminal, vec![json!(1), json!(1), json!(1)]);
}

#[tokio::test]
async fn test_resume_restarts_disabled_steps() {
  let dir = tempfile::tempdir().unwrap();
  let db = dir.path().join("cascade.db");

  let broken = Arc::new(AtomicBool::new(true));
  let calls = Arc::new(AtomicU32::new(0));
  let registry = StageRegistry::with_builtins().with(
    "switch",
    Switch {
      broken: broken.clone(),
      calls: calls.clone(),
    },
  );
  let pipeline = Pipeline::waterfall(vec![script("passthrough"), script("switch")]);

  // First run: the second stage fails and its consumer is disabled.
  let log: Arc<dyn CommitLog> = Arc::new(SqliteLog::open(&db).await.unwrap());
  let first = runtime(&pipeline, registry.clone(), log.clone());
  let summary = run(&first, json!({ "id": 1 }), RunOptions::fresh()).await;
  assert_eq!(summary.outcome, RunOutcome::Halted);
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(log.len("waterfall_0").await.unwrap(), 1);

  // Resuming without a restart leaves the step halted and skips it.
  let second = runtime(&pipeline, registry.clone(), log.clone());
  let summary = run(&second, json!({ "id": 1 }), RunOptions::resume()).await;
  assert_eq!(summary.outcome, RunOutcome::Halted);
  assert!(summary.failures.is_empty());
  assert_eq!(summary.disabled.len(), 1);
  assert_eq!(calls.load(Ordering::SeqCst), 1);

  // Restarting the disabled step retries the entry it failed on. Upstream
  // stages are not re-run and the init topic is not reseeded.
  broken.store(false, Ordering::SeqCst);
  let third = runtime(&pipeline, registry, log.clone());
  let summary = run(
    &third,
    json!({ "id": 1 }),
    RunOptions::resume().with_restart_disabled_steps(),
  )
  .await;

  assert_eq!(summary.outcome, RunOutcome::Completed);
  assert_eq!(summary.terminal, vec![json!({ "switched": { "id": 1 } })]);
  assert!(summary.disabled.is_empty());
  assert_eq!(calls.load(Ordering::SeqCst), 2);
  assert_eq!(log.len("init").await.unwrap(), 1);
  assert_eq!(log.len("waterfall_0").await.unwrap(), 1);
}

#[tokio::test]
async fn test_fresh_run_resets_previous_state() {
  let log = Arc::new(MemoryLog::new());
  let pipeline = Pipeline::waterfall(vec![script("passthrough")]);
  let runtime = runtime(&pipeline, StageRegistry::with_builtins(), log.clone());

  run(&runtime, json!(1), RunOptions::fresh()).await;
  let summary = run(&runtime, json!(2), RunOptions::fresh()).await;

  assert_eq!(summary.terminal, vec![json!(2)]);
  assert_eq!(log.len("init").await.unwrap(), 1);
}
