//! Topic names.

use std::fmt;
use std::str::FromStr;

use cascade_topology::{StagePath, TopologyError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A point in the compiled graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
  /// Entry point. Top-level parallel branches each get their own.
  Init(Option<usize>),
  Stage(StagePath),
  /// Shared terminal point.
  End,
}

/// A named append-only stream in the commit log.
///
/// `Out` carries a node's output; `Pre` carries the invocation envelope built
/// for a node, just before its worker runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
  Out(Node),
  Pre(Node),
}

impl Topic {
  pub fn init() -> Self {
    Topic::Out(Node::Init(None))
  }

  pub fn init_branch(branch: usize) -> Self {
    Topic::Out(Node::Init(Some(branch)))
  }

  /// The topic a run is finished on.
  pub fn terminal() -> Self {
    Topic::Pre(Node::End)
  }

  pub fn stage(path: StagePath) -> Self {
    Topic::Out(Node::Stage(path))
  }

  pub fn pre_stage(path: StagePath) -> Self {
    Topic::Pre(Node::Stage(path))
  }

  pub fn is_init(&self) -> bool {
    matches!(self, Topic::Out(Node::Init(_)))
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Topic::Pre(Node::End))
  }
}

impl fmt::Display for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Node::Init(None) => f.write_str("init"),
      Node::Init(Some(branch)) => write!(f, "init_{}", branch),
      Node::Stage(path) => write!(f, "{}", path),
      Node::End => f.write_str("end"),
    }
  }
}

impl fmt::Display for Topic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Topic::Out(node) => write!(f, "{}", node),
      Topic::Pre(node) => write!(f, "pre_{}", node),
    }
  }
}

impl FromStr for Node {
  type Err = TopologyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "init" => return Ok(Node::Init(None)),
      "end" => return Ok(Node::End),
      _ => {}
    }

    if let Some(branch) = s.strip_prefix("init_") {
      return branch
        .parse()
        .map(|b| Node::Init(Some(b)))
        .map_err(|_| TopologyError::InvalidStageName {
          name: s.to_string(),
        });
    }

    s.parse().map(Node::Stage)
  }
}

impl FromStr for Topic {
  type Err = TopologyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.strip_prefix("pre_") {
      Some(rest) => rest.parse().map(Topic::Pre),
      None => s.parse().map(Topic::Out),
    }
  }
}

impl Serialize for Topic {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Topic {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}
