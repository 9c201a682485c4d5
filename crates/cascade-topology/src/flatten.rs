//! Topology flattening.

use cascade_config::{Pipeline, Step};
use serde::{Serialize, Serializer};

use crate::error::TopologyError;
use crate::path::{StagePath, StepKind};

/// One element of a flattened topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatEntry {
  Stage(StagePath),
  /// The children of the stage immediately before this entry.
  Nested(FlatList),
}

/// An ordered, possibly nested list of stage paths.
pub type FlatList = Vec<FlatEntry>;

impl FlatEntry {
  pub fn as_stage(&self) -> Option<&StagePath> {
    match self {
      FlatEntry::Stage(path) => Some(path),
      FlatEntry::Nested(_) => None,
    }
  }
}

impl Serialize for FlatEntry {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      FlatEntry::Stage(path) => path.serialize(serializer),
      FlatEntry::Nested(list) => list.serialize(serializer),
    }
  }
}

/// A node of the config tree that may own waterfall/parallel child arrays.
pub trait StepTree {
  /// The child array of the given kind. `Subwaterfall` reads the `parallel` key.
  fn children(&self, kind: StepKind) -> Option<&[Step]>;

  fn has_children(&self) -> bool {
    self.children(StepKind::Waterfall).is_some() || self.children(StepKind::Parallel).is_some()
  }
}

impl StepTree for Pipeline {
  fn children(&self, kind: StepKind) -> Option<&[Step]> {
    match kind {
      StepKind::Waterfall => self.waterfall.as_deref(),
      StepKind::Parallel | StepKind::Subwaterfall => self.parallel.as_deref(),
    }
  }
}

impl StepTree for Step {
  fn children(&self, kind: StepKind) -> Option<&[Step]> {
    match kind {
      StepKind::Waterfall => self.waterfall.as_deref(),
      StepKind::Parallel | StepKind::Subwaterfall => self.parallel.as_deref(),
    }
  }
}

/// Flatten a config node into an ordered list of stage paths.
///
/// Waterfall children are listed before parallel children, each in declaration
/// order. A step that declares a child array is immediately followed by a
/// [`FlatEntry::Nested`] holding its flattened children, even when that array is
/// empty; the validator rejects empty levels.
pub fn flatten<T: StepTree + ?Sized>(node: &T, prefix: Option<&StagePath>) -> FlatList {
  let mut list = Vec::new();

  for kind in [StepKind::Waterfall, StepKind::Parallel] {
    let Some(steps) = node.children(kind) else {
      continue;
    };

    for (index, step) in steps.iter().enumerate() {
      let path = match prefix {
        Some(prefix) => prefix.child(kind, index),
        None => StagePath::root(kind, index),
      };

      list.push(FlatEntry::Stage(path.clone()));
      if step.has_children() {
        list.push(FlatEntry::Nested(flatten(step, Some(&path))));
      }
    }
  }

  list
}

/// Flatten an untyped JSON config.
///
/// `null` is an error; any other non-object value has no steps and flattens to
/// an empty list.
pub fn flatten_value(value: &serde_json::Value) -> Result<FlatList, TopologyError> {
  match value {
    serde_json::Value::Null => Err(TopologyError::NotAnObject),
    serde_json::Value::Object(_) => {
      let pipeline = Pipeline::from_value(value.clone())?;
      Ok(flatten(&pipeline, None))
    }
    _ => Ok(Vec::new()),
  }
}
