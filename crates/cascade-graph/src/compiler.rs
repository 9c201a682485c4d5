//! Topology to edge-list compilation.

use std::sync::Arc;

use cascade_config::{Pipeline, Step};
use cascade_topology::{
  FlatEntry, FlatList, StagePath, StepKind, TopologyError, flatten, resolve, validate,
};
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::edge::{Edge, EdgeConfig, EdgePlan, GlueFn, Processor};
use crate::envelope::Envelope;
use crate::graph::Graph;
use crate::topic::Topic;

/// The result of compiling a pipeline.
#[derive(Debug, Clone)]
pub struct Compilation {
  edges: Vec<Edge>,
  skipped: Vec<StagePath>,
}

impl Compilation {
  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  pub fn into_edges(self) -> Vec<Edge> {
    self.edges
  }

  /// Stages that produced no edges because no module resolved for them.
  pub fn skipped(&self) -> &[StagePath] {
    &self.skipped
  }

  /// Edges that publish to the terminal topic.
  pub fn terminal_edges(&self) -> impl Iterator<Item = &Edge> {
    self.edges.iter().filter(|e| e.is_terminal())
  }

  /// The `init` topics a run has to be seeded on, in branch order.
  pub fn init_topics(&self) -> Vec<Topic> {
    let mut topics: Vec<Topic> = self
      .edges
      .iter()
      .filter(|e| e.from.is_init())
      .map(|e| e.from.clone())
      .collect();
    topics.sort();
    topics.dedup();
    topics
  }

  pub fn graph(&self) -> Graph {
    Graph::new(&self.edges)
  }

  pub fn to_plan(&self) -> Vec<EdgePlan> {
    self.edges.iter().map(Edge::plan).collect()
  }
}

/// Flatten, validate and compile a pipeline in one go.
pub fn compile_pipeline(
  pipeline: &Pipeline,
  ctx: Arc<RunContext>,
) -> Result<Compilation, TopologyError> {
  let list = flatten(pipeline, None);
  validate(&list)?;
  Ok(compile(pipeline, &list, ctx))
}

/// Compile a validated topology into edges.
///
/// A top-level parallel is compiled branch by branch: each branch is renamed to
/// `subwaterfall_<i>` and gets its own `init_<i>` entry topic, while all
/// branches finish on the shared terminal topic. Anything else is compiled as
/// one sequence from `init` to the terminal topic.
///
/// Stages whose module does not resolve are skipped with a warning. Their
/// position still names the topics around them.
pub fn compile(pipeline: &Pipeline, list: &FlatList, ctx: Arc<RunContext>) -> Compilation {
  let mut compiler = Compiler {
    pipeline,
    ctx,
    edges: Vec::new(),
    skipped: Vec::new(),
  };

  let top_kind = list
    .first()
    .and_then(FlatEntry::as_stage)
    .map(|path| path.first().kind);

  match top_kind {
    Some(StepKind::Parallel) => {
      for (branch, entries) in split_branches(list) {
        let renamed = as_subwaterfall(&entries);
        compiler.compile_sequence(Topic::init_branch(branch), &renamed);
      }
    }
    _ => compiler.compile_sequence(Topic::init(), list),
  }

  debug!(
    edges = compiler.edges.len(),
    skipped = compiler.skipped.len(),
    "pipeline_compiled"
  );

  Compilation {
    edges: compiler.edges,
    skipped: compiler.skipped,
  }
}

struct Compiler<'a> {
  pipeline: &'a Pipeline,
  ctx: Arc<RunContext>,
  edges: Vec<Edge>,
  skipped: Vec<StagePath>,
}

impl Compiler<'_> {
  fn compile_sequence(&mut self, init: Topic, list: &[FlatEntry]) {
    let last = self.walk(init, list);
    self.push(Edge::new(
      last,
      Topic::terminal(),
      Processor::Finish,
      EdgeConfig::default(),
    ));
  }

  /// Compile one level of the topology, starting from `source`.
  ///
  /// Returns the topic the next step after this level should read from.
  fn walk(&mut self, source: Topic, list: &[FlatEntry]) -> Topic {
    let mut source = source;
    // Output of the stage right before the current entry.
    let mut owner: Option<Topic> = None;

    for entry in list {
      match entry {
        FlatEntry::Stage(path) => {
          self.compile_stage(&source, path);

          let out = Topic::stage(path.clone());
          // Parallel siblings all read the same input, so the source only
          // moves past steps that are not parallel children.
          if !path.is_parallel_child() {
            source = out.clone();
          }
          owner = Some(out);
        }
        FlatEntry::Nested(children) => {
          let Some(owner) = owner.take() else {
            warn!(stages = children.len(), "nested_level_orphaned");
            continue;
          };
          let end = self.walk(owner.clone(), children);
          // A parallel group hands the owner back; a waterfall group hands
          // over its last step.
          if source == owner {
            source = end;
          }
        }
      }
    }

    source
  }

  /// Emit the `pre_<stage>` glue edge and the `<stage>` worker edge.
  fn compile_stage(&mut self, source: &Topic, path: &StagePath) {
    let pipeline = self.pipeline;
    let Some((step, module)) =
      resolve(pipeline, path).and_then(|step| step.module.as_deref().map(|module| (step, module)))
    else {
      warn!(stage = %path, reason = "no module resolved", "stage_skipped");
      self.skipped.push(path.clone());
      return;
    };

    let pre = Topic::pre_stage(path.clone());
    let out = Topic::stage(path.clone());

    let glue = glue_processor(step, module, out.to_string(), self.ctx.clone());
    self.push(Edge::new(
      source.clone(),
      pre.clone(),
      Processor::Glue(glue),
      EdgeConfig::default(),
    ));

    self.push(Edge::new(
      pre,
      out,
      Processor::Worker {
        module: module.to_string(),
        stage_type: step.stage_type,
      },
      EdgeConfig {
        retries: step.config.retries,
        timeout_ms: step.config.timeout_ms,
      },
    ));
  }

  fn push(&mut self, edge: Edge) {
    let exists = self
      .edges
      .iter()
      .any(|e| e.from == edge.from && e.to == edge.to);
    if !exists {
      self.edges.push(edge);
    }
  }
}

/// Build the closure that turns an upstream entry body into `step`'s envelope.
fn glue_processor(step: &Step, module: &str, save_topic: String, ctx: Arc<RunContext>) -> GlueFn {
  let step = step.clone();
  let module = module.to_string();
  Arc::new(move |body: &serde_json::Value| {
    serde_json::to_value(Envelope::new(
      &step,
      &module,
      &save_topic,
      &ctx,
      body.clone(),
    ))
  })
}

/// Split a top-level parallel list into `(branch index, entries)` pairs, each
/// holding a branch stage and its nested children.
fn split_branches(list: &FlatList) -> Vec<(usize, FlatList)> {
  let mut branches: Vec<(usize, FlatList)> = Vec::new();

  for entry in list {
    match entry {
      FlatEntry::Stage(path) => branches.push((path.first().index, vec![entry.clone()])),
      FlatEntry::Nested(_) => {
        if let Some((_, entries)) = branches.last_mut() {
          entries.push(entry.clone());
        }
      }
    }
  }

  branches
}

fn as_subwaterfall(list: &[FlatEntry]) -> FlatList {
  list
    .iter()
    .map(|entry| match entry {
      FlatEntry::Stage(path) => FlatEntry::Stage(path.with_parallel_as_subwaterfall()),
      FlatEntry::Nested(nested) => FlatEntry::Nested(as_subwaterfall(nested)),
    })
    .collect()
}
