use thiserror::Error;

/// Errors that can occur while loading a pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The JSON text could not be parsed into a pipeline.
  #[error("invalid pipeline config: {0}")]
  Parse(#[from] serde_json::Error),

  /// The config file could not be read.
  #[error("failed to read pipeline config: {0}")]
  Io(#[from] std::io::Error),

  /// The configuration was `null` or missing entirely.
  #[error("The config must be an object.")]
  NotAnObject,
}
