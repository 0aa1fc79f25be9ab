//! Top-level CLI definition and dispatch.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use thiserror::Error;

use slow_trend_evictor::cli::replay::{Scenario, replay};
use slow_trend_evictor::cluster::storage::FileConfigStorage;
use slow_trend_evictor::core::config::Config;
use slow_trend_evictor::core::errors::EvictError;

/// Slow-trend evictor: replay cluster snapshots through the leader-eviction core.
#[derive(Debug, Parser)]
#[command(
    name = "ste",
    author,
    version,
    about = "Slow-trend leader eviction decision core",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Replay a recorded scenario, printing one JSON line per tick.
    Replay(ReplayArgs),
    /// Print the effective configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args)]
struct ReplayArgs {
    /// Scenario file (JSON).
    #[arg(long, value_name = "PATH")]
    scenario: PathBuf,
    /// Scheduler config store; defaults to `paths.state_file`.
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,
    /// Also print the metrics exposition after the last tick.
    #[arg(long)]
    metrics: bool,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// Emit JSON instead of TOML.
    #[arg(long)]
    json: bool,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<EvictError> for CliError {
    fn from(err: EvictError) -> Self {
        match err {
            EvictError::InvalidConfig { .. }
            | EvictError::MissingConfig { .. }
            | EvictError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

fn log_directive(cli: &Cli) -> &'static str {
    if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    slow_trend_evictor::cli::init_tracing(log_directive(cli));

    match &cli.command {
        Command::Replay(args) => run_replay(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

fn run_replay(cli: &Cli, args: &ReplayArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let scenario = Scenario::from_path(&args.scenario)?;
    let state_path = args
        .state
        .clone()
        .unwrap_or_else(|| config.paths.state_file.clone());
    tracing::info!(
        scenario = %args.scenario.display(),
        state = %state_path.display(),
        config_hash = %config.stable_hash()?,
        "replaying scenario"
    );

    let storage = Arc::new(FileConfigStorage::new(state_path));
    let report = replay(&config, &scenario, storage)?;
    let mut stdout = io::stdout().lock();
    for tick in &report.ticks {
        serde_json::to_writer(&mut stdout, tick)?;
        writeln!(stdout)?;
    }
    if args.metrics {
        write!(stdout, "{}", report.metrics_text)?;
    }
    stdout.flush()?;
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let hash = config.stable_hash()?;
    if args.json {
        let payload = json!({
            "command": "config",
            "source": config.paths.config_file.to_string_lossy(),
            "hash": hash,
            "config": serde_json::to_value(&config)?,
        });
        let mut stdout = io::stdout().lock();
        serde_json::to_writer(&mut stdout, &payload)?;
        writeln!(stdout)?;
        return Ok(());
    }
    println!("# source: {}", config.paths.config_file.display());
    println!("# hash: {hash}");
    println!("{}", config.to_toml()?);
    Ok(())
}
