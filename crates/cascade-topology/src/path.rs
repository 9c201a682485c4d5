//! Structured stage names.
//!
//! A [`StagePath`] is the position of a step in the config tree, stored as an
//! ordered list of `{kind, index}` segments. The `_`-joined string form
//! (`waterfall_0_parallel_1`) is only produced and parsed at the edges of the
//! system: topic names in the commit log and diagnostics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TopologyError;

/// The composition kind of the array a step lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepKind {
  Waterfall,
  Parallel,
  /// A top-level parallel branch, renamed so that it compiles as an isolated
  /// waterfall with its own entry topic.
  Subwaterfall,
}

impl StepKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      StepKind::Waterfall => "waterfall",
      StepKind::Parallel => "parallel",
      StepKind::Subwaterfall => "subwaterfall",
    }
  }
}

impl fmt::Display for StepKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for StepKind {
  type Err = TopologyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "waterfall" => Ok(StepKind::Waterfall),
      "parallel" => Ok(StepKind::Parallel),
      "subwaterfall" => Ok(StepKind::Subwaterfall),
      _ => Err(TopologyError::InvalidStageName {
        name: s.to_string(),
      }),
    }
  }
}

/// One `kind_index` pair of a stage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
  pub kind: StepKind,
  pub index: usize,
}

impl Segment {
  pub fn new(kind: StepKind, index: usize) -> Self {
    Self { kind, index }
  }
}

/// The position of a step in the config tree. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StagePath {
  segments: Vec<Segment>,
}

impl StagePath {
  /// A step of the top-level array.
  pub fn root(kind: StepKind, index: usize) -> Self {
    Self {
      segments: vec![Segment::new(kind, index)],
    }
  }

  /// The path of the `index`th step of this step's `kind` children.
  pub fn child(&self, kind: StepKind, index: usize) -> Self {
    let mut segments = self.segments.clone();
    segments.push(Segment::new(kind, index));
    Self { segments }
  }

  /// The owning step, if this is a nested step.
  pub fn parent(&self) -> Option<Self> {
    if self.segments.len() < 2 {
      return None;
    }
    Some(Self {
      segments: self.segments[..self.segments.len() - 1].to_vec(),
    })
  }

  pub fn segments(&self) -> &[Segment] {
    &self.segments
  }

  /// Number of `kind_index` pairs; 1 for a top-level step.
  pub fn depth(&self) -> usize {
    self.segments.len()
  }

  pub fn first(&self) -> Segment {
    self.segments[0]
  }

  pub fn last(&self) -> Segment {
    self.segments[self.segments.len() - 1]
  }

  /// The kind of the array this step was declared in.
  pub fn last_kind(&self) -> StepKind {
    self.last().kind
  }

  /// True for a child of a parallel group: its siblings all read the same input.
  pub fn is_parallel_child(&self) -> bool {
    self.last_kind() == StepKind::Parallel
  }

  /// The kind shared by this step and its direct parent, if they match.
  pub fn same_kind_as_parent(&self) -> Option<StepKind> {
    match self.segments.as_slice() {
      [.., parent, own] if parent.kind == own.kind => Some(own.kind),
      _ => None,
    }
  }

  /// The same position with every `parallel` segment renamed to `subwaterfall`.
  pub fn with_parallel_as_subwaterfall(&self) -> Self {
    Self {
      segments: self
        .segments
        .iter()
        .map(|s| match s.kind {
          StepKind::Parallel => Segment::new(StepKind::Subwaterfall, s.index),
          _ => *s,
        })
        .collect(),
    }
  }
}

impl fmt::Display for StagePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, segment) in self.segments.iter().enumerate() {
      if i > 0 {
        f.write_str("_")?;
      }
      write!(f, "{}_{}", segment.kind, segment.index)?;
    }
    Ok(())
  }
}

impl FromStr for StagePath {
  type Err = TopologyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || TopologyError::InvalidStageName {
      name: s.to_string(),
    };

    let tokens: Vec<&str> = s.split('_').collect();
    if tokens.is_empty() || tokens.len() % 2 != 0 {
      return Err(invalid());
    }

    let segments = tokens
      .chunks(2)
      .map(|pair| {
        let kind = pair[0].parse::<StepKind>().map_err(|_| invalid())?;
        let index = pair[1].parse::<usize>().map_err(|_| invalid())?;
        Ok(Segment::new(kind, index))
      })
      .collect::<Result<Vec<_>, TopologyError>>()?;

    Ok(Self { segments })
  }
}

impl Serialize for StagePath {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for StagePath {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}
