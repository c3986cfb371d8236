//! ScanRunner CLI - Run external network scans from the terminal
//!
//! Validates targets, runs the scanner through the scanrunner engine,
//! streams its output and stops it cleanly on Ctrl-C.

mod commands;
mod sink;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scanrunner")]
#[command(author, version, about = "Run external network scans without blocking the terminal")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan command against validated targets
    Run {
        /// Comma-separated targets (addresses, CIDR networks, ranges, hostnames)
        #[arg(short, long)]
        targets: Option<String>,

        /// File of targets passed to the scanner with -iL
        #[arg(short = 'f', long, conflicts_with = "targets")]
        target_file: Option<PathBuf>,

        /// Engine config file (default: ~/.scanrunner/engine.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Grace period before a stopped scan is killed, in milliseconds
        #[arg(long)]
        grace_ms: Option<u64>,

        /// Fail the scan if it runs longer than this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write the scan history to this file when done
        #[arg(long)]
        history: Option<PathBuf>,

        /// Program and arguments; a `{target}` argument is replaced by the targets
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Check targets without running anything
    Validate {
        /// Comma-separated targets
        targets: String,
    },

    /// Show the effective engine configuration
    Config {
        /// Engine config file (default: ~/.scanrunner/engine.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            targets,
            target_file,
            config,
            grace_ms,
            timeout_secs,
            history,
            command,
        } => {
            let opts = commands::run::RunOptions {
                targets,
                target_file,
                config,
                grace_ms,
                timeout_secs,
                history,
                command,
                json: cli.json,
            };
            // The engine is single-threaded; its ticks run on a LocalSet.
            let local = tokio::task::LocalSet::new();
            local.run_until(commands::run::run(opts)).await
        }
        Commands::Validate { targets } => commands::validate::run(&targets, cli.json),
        Commands::Config { config } => commands::config::show(config.as_deref(), cli.json).await,
    }
}
