use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Log level for the cascade crates.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
}

impl std::fmt::Display for LogLevel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      LogLevel::Trace => "trace",
      LogLevel::Debug => "debug",
      LogLevel::Info => "info",
      LogLevel::Warn => "warn",
      LogLevel::Error => "error",
    };
    write!(f, "{}", s)
  }
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(level: LogLevel) -> String {
  format!("cascade={},warn", level)
}

/// Install the global subscriber. Logs go to stderr; stdout carries results.
pub fn init_tracing(level: LogLevel) -> Result<()> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .try_init()
    .map_err(|e| anyhow!("failed to initialize tracing: {}", e))
}
