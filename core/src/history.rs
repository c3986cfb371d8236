//! Bounded record of started scans, newest first.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Local};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::{ScanSession, ScanState, SessionId};
use crate::error::{Error, Result};

/// One started scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub session: SessionId,
    pub started_at: DateTime<Local>,
    /// Command line as it was run.
    pub command: String,
    /// Terminal state, once the session has finished.
    pub outcome: Option<ScanState>,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.command
        )?;
        if let Some(outcome) = self.outcome {
            write!(f, " ({})", outcome)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScanHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl ScanHistory {
    /// Create a history keeping at most `limit` entries.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Record a newly started session. The oldest entry falls off at the limit.
    pub fn record(&mut self, session: &ScanSession) {
        self.entries.push_front(HistoryEntry {
            session: session.id,
            started_at: session.started_at,
            command: session.command.to_string(),
            outcome: None,
        });
        self.entries.truncate(self.limit);
    }

    /// Fill in the outcome of a recorded session.
    pub fn complete(&mut self, session: SessionId, outcome: ScanState) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.session == session) {
            entry.outcome = Some(outcome);
        }
    }

    /// Entries, newest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Write the history to `path`, one entry per line, newest first.
    ///
    /// Writes to a temp file and renames it into place.
    pub async fn export(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut content = String::new();
        for entry in &self.entries {
            content.push_str(&entry.to_string());
            content.push('\n');
        }

        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to create history file: {}", e)))?;

        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

impl Default for ScanHistory {
    fn default() -> Self {
        Self::new(100)
    }
}
