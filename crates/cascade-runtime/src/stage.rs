//! Stage workers and their invocation context.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cascade_graph::Envelope;

use crate::error::StageError;

/// Key of the sentinel a stage emits when it yields nothing.
pub const CONTINUE_KEY: &str = "continue";

/// A stage implementation, registered under a module name.
///
/// `run` is invoked once per attempt with the envelope's input (the sentinel
/// key already stripped) and the step's params. A returned `Some(value)` is
/// yielded on the stage's behalf; stages that produce several results use the
/// yield methods on [`StageContext`] and return `None`.
#[async_trait]
pub trait Stage: Send + Sync {
  async fn run(
    &self,
    ctx: &mut StageContext,
    input: serde_json::Value,
    params: serde_json::Value,
  ) -> Result<Option<serde_json::Value>, StageError>;
}

/// Per-attempt state handed to a stage.
///
/// Yields are only buffered here. The driver commits them once the attempt
/// succeeds, and throws them away if it fails.
#[derive(Debug)]
pub struct StageContext {
  envelope: Envelope,
  current_retry: u32,
  yields: Vec<serde_json::Value>,
  recursive: Vec<serde_json::Value>,
}

impl StageContext {
  pub fn new(envelope: Envelope, current_retry: u32) -> Self {
    Self {
      envelope,
      current_retry,
      yields: Vec::new(),
      recursive: Vec::new(),
    }
  }

  /// Zero on the first attempt, incremented on every retry.
  pub fn current_retry(&self) -> u32 {
    self.current_retry
  }

  pub fn envelope(&self) -> &Envelope {
    &self.envelope
  }

  /// Topic the stage's yields are published to.
  pub fn save_topic(&self) -> &str {
    &self.envelope.save_topic
  }

  /// Browser connection options. Only scrapers receive them.
  pub fn connection_config(&self) -> Option<&serde_json::Value> {
    self.envelope.connection_config.as_ref()
  }

  pub fn yield_value(&mut self, value: serde_json::Value) {
    self.yields.push(value);
  }

  pub fn yield_each(&mut self, values: impl IntoIterator<Item = serde_json::Value>) {
    self.yields.extend(values);
  }

  /// Feed `input` back into this stage as a new invocation.
  pub fn recursive_yield(&mut self, input: serde_json::Value) {
    self.recursive.push(input);
  }

  pub fn recursive_yield_each(&mut self, inputs: impl IntoIterator<Item = serde_json::Value>) {
    self.recursive.extend(inputs);
  }

  /// Whether anything was yielded, recursively or not.
  pub fn has_yielded(&self) -> bool {
    !self.yields.is_empty() || !self.recursive.is_empty()
  }

  /// Buffered `(yields, recursive yields)`.
  pub(crate) fn into_yields(self) -> (Vec<serde_json::Value>, Vec<serde_json::Value>) {
    (self.yields, self.recursive)
  }
}

/// Remove the sentinel key from an object input.
pub(crate) fn strip_continue(input: &mut serde_json::Value) {
  if let Some(object) = input.as_object_mut() {
    object.remove(CONTINUE_KEY);
  }
}

pub(crate) fn continue_sentinel() -> serde_json::Value {
  let mut object = serde_json::Map::new();
  object.insert(CONTINUE_KEY.to_string(), serde_json::Value::Bool(true));
  serde_json::Value::Object(object)
}

/// Module name to stage lookup.
#[derive(Clone, Default)]
pub struct StageRegistry {
  stages: HashMap<String, Arc<dyn Stage>>,
}

impl StageRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with the stages that ship with cascade.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register("passthrough", crate::builtins::Passthrough);
    registry.register("log", crate::builtins::LogStage);
    registry
  }

  pub fn register(&mut self, module: impl Into<String>, stage: impl Stage + 'static) -> &mut Self {
    self.stages.insert(module.into(), Arc::new(stage));
    self
  }

  pub fn with(mut self, module: impl Into<String>, stage: impl Stage + 'static) -> Self {
    self.register(module, stage);
    self
  }

  pub fn get(&self, module: &str) -> Option<Arc<dyn Stage>> {
    self.stages.get(module).cloned()
  }

  pub fn contains(&self, module: &str) -> bool {
    self.stages.contains_key(module)
  }

  pub fn modules(&self) -> Vec<&str> {
    let mut modules: Vec<&str> = self.stages.keys().map(String::as_str).collect();
    modules.sort_unstable();
    modules
  }
}

impl fmt::Debug for StageRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StageRegistry")
      .field("modules", &self.modules())
      .finish()
  }
}
