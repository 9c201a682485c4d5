use cascade_config::ConfigError;
use thiserror::Error;

use crate::path::StepKind;

/// Structural errors in a pipeline topology.
///
/// All of these are fatal before execution starts and are never retried.
#[derive(Debug, Error)]
pub enum TopologyError {
  /// The config was `null` or absent.
  #[error("The config must be an object.")]
  NotAnObject,

  /// The config object could not be read as a pipeline.
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("Can't have more than two nested levels")]
  TooManyLevels { stage: String },

  #[error("Can't have an empty level.")]
  EmptyLevel,

  #[error("The config must start with a waterfall or a parallel")]
  MissingTopLevelKind,

  #[error("Can't mix waterfall and parallel at the top level")]
  MixedTopLevel,

  /// A step nests a child array of its own kind.
  #[error("Can't nest a {kind} inside a {kind}")]
  SameKindNesting { kind: StepKind, stage: String },

  /// A topic or stage name that does not parse as a stage path.
  #[error("invalid stage name: {name}")]
  InvalidStageName { name: String },
}
