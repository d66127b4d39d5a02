//! guestlink CLI
//!
//! Runs commands inside guest workers through their agent channels.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use guestlink_cli::exec_cmd::{self, ExecArgs};
use guestlink_cli::settings::{self, CliOverrides};
use guestlink_cli::workers_cmd;
use guestlink_core::{BoundaryMode, ExecMode};

#[derive(Parser, Debug)]
#[command(name = "guestlink")]
#[command(version, about = "Run commands inside guest workers", long_about = None)]
struct Cli {
    /// Config file to use instead of the global and project settings
    #[arg(long, env = "GUESTLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "GUESTLINK_LOG_JSON")]
    log_json: bool,

    /// Give up on a submission after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Frame boundary handling (legacy or complete)
    #[arg(long)]
    framing: Option<BoundaryMode>,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "GUESTLINK_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command and print its result
    Exec(ExecArgs),
    /// Run a search and print matches as they arrive
    Search(ExecArgs),
    /// List configured workers
    Workers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        log_level: cli.log_level.clone(),
        timeout_ms: cli.timeout_ms,
        framing: cli.framing,
    };
    let config = settings::resolve(cli.config.as_deref(), &overrides)?;

    #[cfg(feature = "metrics")]
    let metrics_endpoint = cli.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint: Option<&str> = None;

    // Hold the guard so the OTel pipeline stays alive for the process lifetime.
    let log_filter = format!("guestlink={0},guestlink_core={0}", config.log_level);
    let _metrics_guard = guestlink_core::tracing_init::init_tracing_with_metrics(
        &log_filter,
        cli.log_json,
        metrics_endpoint,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.workers.len(),
        framing = %config.framing.boundary,
        "Starting guestlink"
    );

    match cli.command {
        Command::Workers => workers_cmd::run(&config),
        Command::Exec(args) => exec_cmd::run(&config, args, ExecMode::Exec).await,
        Command::Search(args) => exec_cmd::run(&config, args, ExecMode::Search).await,
    }
}
