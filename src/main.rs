use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cascade_config::Pipeline;
use cascade_graph::{RunContext, compile_pipeline};
use cascade_runtime::{RunOptions, Runtime, StageRegistry};
use cascade_store::SqliteLog;
use cascade_topology::{flatten_value, validate};

mod logging;

use logging::{LogLevel, init_tracing};

/// Cascade - runs nested waterfall/parallel pipelines over a durable commit log
#[derive(Parser)]
#[command(name = "cascade")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.cascade)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Log level for cascade events; RUST_LOG takes precedence
  #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
  log_level: LogLevel,

  #[command(subcommand)]
  command: Option<Commands>,
}

/// Where the pipeline config comes from.
#[derive(Args)]
struct ConfigSource {
  /// Path to the pipeline config file (JSON)
  config_file: Option<PathBuf>,

  /// Pipeline config as an inline JSON string
  #[arg(long, visible_alias = "jsonConfig", conflicts_with = "config_file")]
  json_config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a pipeline
  Run {
    #[command(flatten)]
    source: ConfigSource,

    /// Run input as JSON (default: stdin, or {} when stdin is a terminal)
    #[arg(long)]
    input: Option<String>,

    /// Commit log database (default: <data-dir>/cascade.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Continue from the state left by the previous run
    #[arg(long)]
    resume: bool,

    /// With --resume, retry stages that exhausted their retries last time
    #[arg(long, visible_alias = "restartDisabledSteps", requires = "resume")]
    restart_disabled_steps: bool,

    /// Folder stages read and write project files in (default: current directory)
    #[arg(long)]
    project_folder: Option<PathBuf>,
  },

  /// Print the compiled edge plan of a pipeline
  Compile {
    #[command(flatten)]
    source: ConfigSource,
  },

  /// Validate a pipeline and print its flattened topology
  Validate {
    #[command(flatten)]
    source: ConfigSource,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.log_level)?;

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".cascade"),
  };

  match cli.command {
    Some(Commands::Run {
      source,
      input,
      db,
      resume,
      restart_disabled_steps,
      project_folder,
    }) => {
      let options = RunOptions {
        resume,
        restart_disabled_steps,
      };
      let completed = run_pipeline(source, input, db, options, project_folder, data_dir)?;
      if !completed {
        std::process::exit(1);
      }
    }
    Some(Commands::Compile { source }) => {
      compile(source, data_dir)?;
    }
    Some(Commands::Validate { source }) => {
      validate_config(source)?;
    }
    None => {
      println!("cascade - use --help to see available commands");
    }
  }

  Ok(())
}

fn run_pipeline(
  source: ConfigSource,
  input: Option<String>,
  db: Option<PathBuf>,
  options: RunOptions,
  project_folder: Option<PathBuf>,
  data_dir: PathBuf,
) -> Result<bool> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    run_pipeline_async(source, input, db, options, project_folder, data_dir).await
  })
}

async fn run_pipeline_async(
  source: ConfigSource,
  input: Option<String>,
  db: Option<PathBuf>,
  options: RunOptions,
  project_folder: Option<PathBuf>,
  data_dir: PathBuf,
) -> Result<bool> {
  let pipeline = load_pipeline(&source)?;

  let input = match input {
    Some(json) => serde_json::from_str(&json).context("failed to parse --input JSON")?,
    None => read_payload_from_stdin()?,
  };

  let ctx = Arc::new(run_context(&pipeline, project_folder, &data_dir)?);

  let db = db.unwrap_or_else(|| data_dir.join("cascade.db"));
  if let Some(parent) = db.parent().filter(|p| !p.as_os_str().is_empty()) {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create data directory: {}", parent.display()))?;
  }
  let log = SqliteLog::open(&db)
    .await
    .with_context(|| format!("failed to open commit log: {}", db.display()))?;

  let runtime = Runtime::new(&pipeline, ctx, StageRegistry::with_builtins(), Arc::new(log))
    .context("failed to prepare pipeline")?;

  info!(
    db = %db.display(),
    resume = options.resume,
    restart_disabled_steps = options.restart_disabled_steps,
    "pipeline_loaded"
  );

  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!(action = "stopping after in-flight stages", "interrupt_received");
      on_signal.cancel();
    }
  });

  let summary = runtime
    .run(input, options, cancel)
    .await
    .context("pipeline run failed")?;

  println!("{}", serde_json::to_string_pretty(&summary)?);

  Ok(summary.is_completed())
}

fn compile(source: ConfigSource, data_dir: PathBuf) -> Result<()> {
  let pipeline = load_pipeline(&source)?;
  let ctx = Arc::new(run_context(&pipeline, None, &data_dir)?);

  let compilation = compile_pipeline(&pipeline, ctx).context("invalid pipeline")?;

  let graph = compilation.graph();
  let output = serde_json::json!({
    "edges": compilation.to_plan(),
    "skipped": compilation.skipped(),
    "dangling": graph.dangling(),
  });
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

fn validate_config(source: ConfigSource) -> Result<()> {
  let value = load_config_value(&source)?;

  let list = flatten_value(&value).context("failed to read pipeline")?;
  validate(&list).context("invalid pipeline")?;

  println!("{}", serde_json::to_string_pretty(&list)?);

  Ok(())
}

fn run_context(
  pipeline: &Pipeline,
  project_folder: Option<PathBuf>,
  data_dir: &Path,
) -> Result<RunContext> {
  let project_folder = match project_folder {
    Some(folder) => folder,
    None => std::env::current_dir().context("could not determine current directory")?,
  };

  Ok(
    RunContext::new(project_folder, data_dir)
      .with_connection_config(pipeline.connection_config()),
  )
}

fn load_config_value(source: &ConfigSource) -> Result<serde_json::Value> {
  let content = match (&source.json_config, &source.config_file) {
    (Some(json), _) => json.clone(),
    (None, Some(path)) => std::fs::read_to_string(path)
      .with_context(|| format!("failed to read config file: {}", path.display()))?,
    (None, None) => anyhow::bail!("no pipeline given: pass a config file or --json-config"),
  };

  serde_json::from_str(&content).context("failed to parse pipeline config JSON")
}

fn load_pipeline(source: &ConfigSource) -> Result<Pipeline> {
  let value = load_config_value(source)?;
  Pipeline::from_value(value).context("failed to read pipeline")
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read input from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse input JSON from stdin")
    }
  }
}
