//! Config command - show the effective engine configuration.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use scanrunner_core::EngineConfig;

/// Resolve the config path and load it.
pub async fn load(path: Option<&Path>) -> Result<(PathBuf, EngineConfig)> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => EngineConfig::default_path()?,
    };
    let config = EngineConfig::load(&path).await?;
    Ok((path, config))
}

pub async fn show(path: Option<&Path>, json: bool) -> Result<ExitCode> {
    let (path, config) = load(path).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Config file: {}", path.display());
    println!();
    println!("Tick interval:    {} ms", config.tick_interval_ms);
    println!("Batch size:       {} lines", config.batch_size);
    println!("Grace period:     {} ms", config.grace_period_ms);
    println!("Queue capacity:   {} lines", config.queue_capacity);
    println!("Validation cache: {} entries", config.validation_cache_limit);
    println!("Progress markers: {}", config.progress_markers.join(", "));
    match config.max_duration_secs {
        Some(secs) => println!("Time limit:       {} s", secs),
        None => println!("Time limit:       none"),
    }
    println!("History limit:    {} entries", config.history_limit);

    Ok(ExitCode::SUCCESS)
}
