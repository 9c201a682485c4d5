//! Structural validation of a flattened topology.

use crate::error::TopologyError;
use crate::flatten::{FlatEntry, FlatList};
use crate::path::{Segment, StepKind};

/// Deepest allowed stage path, counted in `kind_index` pairs.
const MAX_DEPTH: usize = 2;

/// Reject empty levels and stages nested more than two levels deep.
pub fn check_step_levels(list: &FlatList) -> Result<(), TopologyError> {
  if list.is_empty() {
    return Err(TopologyError::EmptyLevel);
  }

  for entry in list {
    match entry {
      FlatEntry::Stage(path) if path.depth() > MAX_DEPTH => {
        return Err(TopologyError::TooManyLevels {
          stage: path.to_string(),
        });
      }
      FlatEntry::Stage(_) => {}
      FlatEntry::Nested(nested) => check_step_levels(nested)?,
    }
  }

  Ok(())
}

/// Check the top-level kind and reject same-kind-inside-same-kind nesting.
pub fn validate_step_format(list: &FlatList) -> Result<(), TopologyError> {
  let top_kind = match list.first().and_then(FlatEntry::as_stage) {
    Some(path) if path.segments() == [Segment::new(StepKind::Waterfall, 0)] => StepKind::Waterfall,
    Some(path) if path.segments() == [Segment::new(StepKind::Parallel, 0)] => StepKind::Parallel,
    _ => return Err(TopologyError::MissingTopLevelKind),
  };

  for entry in list {
    match entry {
      FlatEntry::Stage(path) if path.first().kind != top_kind => {
        return Err(TopologyError::MixedTopLevel);
      }
      FlatEntry::Stage(_) => {}
      FlatEntry::Nested(nested) => check_nesting(nested)?,
    }
  }

  Ok(())
}

fn check_nesting(list: &FlatList) -> Result<(), TopologyError> {
  for entry in list {
    match entry {
      FlatEntry::Stage(path) => {
        if let Some(kind) = path.same_kind_as_parent() {
          return Err(TopologyError::SameKindNesting {
            kind,
            stage: path.to_string(),
          });
        }
      }
      FlatEntry::Nested(nested) => check_nesting(nested)?,
    }
  }
  Ok(())
}

/// Run both structural checks.
pub fn validate(list: &FlatList) -> Result<(), TopologyError> {
  check_step_levels(list)?;
  validate_step_format(list)
}
