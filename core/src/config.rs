//! Engine configuration.
//!
//! Read from JSON at `~/.scanrunner/engine.json`. The engine only reads this
//! file; writing it belongs to the host application.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Error, Result};

/// Tunables for the scan engine. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Consumer tick cadence in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum lines forwarded per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Time a process gets to exit after the polite stop, in milliseconds.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Capacity of the output queue between reader and consumer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Cached target verdicts kept before the cache is cleared.
    #[serde(default = "default_validation_cache_limit")]
    pub validation_cache_limit: usize,

    /// Substrings that mark a line as a progress update.
    #[serde(default = "default_progress_markers")]
    pub progress_markers: Vec<String>,

    /// Optional bound on how long one scan may run, in seconds.
    #[serde(default)]
    pub max_duration_secs: Option<u64>,

    /// Number of scan history entries kept.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_batch_size() -> usize {
    50
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_validation_cache_limit() -> usize {
    crate::validator::DEFAULT_CACHE_LIMIT
}

fn default_progress_markers() -> Vec<String> {
    vec!["Progress:".to_string(), "Timing:".to_string()]
}

fn default_history_limit() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            batch_size: default_batch_size(),
            grace_period_ms: default_grace_period_ms(),
            queue_capacity: default_queue_capacity(),
            validation_cache_limit: default_validation_cache_limit(),
            progress_markers: default_progress_markers(),
            max_duration_secs: None,
            history_limit: default_history_limit(),
        }
    }
}

impl EngineConfig {
    /// Default config path: `~/.scanrunner/engine.json`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
        Ok(home.join(".scanrunner").join("engine.json"))
    }

    /// Load configuration from `path`.
    ///
    /// Returns the default config if the file doesn't exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tickIntervalMs must be greater than zero".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batchSize must be greater than zero".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queueCapacity must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.validation_cache_limit, 1000);
        assert!(config.max_duration().is_none());
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("engine.json")).await.unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_load_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "gracePeriodMs": 250, "maxDurationSecs": 600 }"#).unwrap();

        let config = EngineConfig::load(&path).await.unwrap();
        assert_eq!(config.grace_period(), Duration::from_millis(250));
        assert_eq!(config.max_duration(), Some(Duration::from_secs(600)));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.progress_markers, vec!["Progress:", "Timing:"]);
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = tokio_test::block_on(EngineConfig::load(&path));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = EngineConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_string(&EngineConfig::default()).unwrap();
        assert!(json.contains("\"tickIntervalMs\":100"));
        assert!(json.contains("\"gracePeriodMs\":5000"));
    }
}
