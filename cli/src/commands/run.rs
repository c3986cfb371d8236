//! Run command - execute a scan and stream its output.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use scanrunner_core::{
    validator, ScanCommand, ScanController, ScanRequest, ScanState, TokioScheduler,
};
use tracing::debug;

use crate::sink::TerminalSink;

/// Placeholder argument replaced by the target words.
const TARGET_PLACEHOLDER: &str = "{target}";

/// How often the command checks whether the scan has finished.
const WAIT_INTERVAL: Duration = Duration::from_millis(50);

pub struct RunOptions {
    pub targets: Option<String>,
    pub target_file: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub grace_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub history: Option<PathBuf>,
    pub command: Vec<String>,
    pub json: bool,
}

/// Words the targets contribute to the command line.
fn target_words(targets: Option<&str>, target_file: Option<&Path>) -> Vec<String> {
    if let Some(path) = target_file {
        return vec!["-iL".to_string(), path.display().to_string()];
    }
    targets
        .map(|t| validator::split_targets(t).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Splice the targets into `words` at `{target}`, or append them.
pub fn build_command(words: &[String], targets: Vec<String>) -> Result<ScanCommand> {
    let (program, args) = words.split_first().context("No command specified")?;

    let mut out = Vec::with_capacity(args.len() + targets.len());
    let mut placed = false;
    for arg in args {
        if arg == TARGET_PLACEHOLDER {
            out.extend(targets.iter().cloned());
            placed = true;
        } else {
            out.push(arg.clone());
        }
    }
    if !placed {
        out.extend(targets);
    }

    Ok(ScanCommand::new(program.clone(), out))
}

pub async fn run(opts: RunOptions) -> Result<ExitCode> {
    let (_, mut config) = super::config::load(opts.config.as_deref()).await?;
    if let Some(grace) = opts.grace_ms {
        config.grace_period_ms = grace;
    }
    if let Some(limit) = opts.timeout_secs {
        config.max_duration_secs = Some(limit);
    }

    let words = target_words(opts.targets.as_deref(), opts.target_file.as_deref());
    let command = build_command(&opts.command, words)?;
    let request = match (&opts.target_file, opts.targets) {
        (Some(path), _) => ScanRequest::with_target_file(command, path),
        (None, targets) => ScanRequest::new(command, targets.unwrap_or_default()),
    };

    let controller = Rc::new(ScanController::new(
        config,
        TerminalSink::new(opts.json),
        Rc::new(TokioScheduler::new()),
    )?);
    controller.start(request)?;

    let stopper = Rc::clone(&controller);
    tokio::task::spawn_local(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping scan...");
            if let Err(e) = stopper.stop() {
                debug!(error = %e, "Stop request ignored");
            }
        }
    });

    while controller.is_running() {
        tokio::time::sleep(WAIT_INTERVAL).await;
    }

    if let Some(path) = &opts.history {
        let history = controller.history().clone();
        history
            .export(path)
            .await
            .with_context(|| format!("Failed to write history to {}", path.display()))?;
    }

    Ok(match controller.state() {
        ScanState::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}
