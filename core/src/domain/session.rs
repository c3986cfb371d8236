//! Scan session domain model.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ScanCommand;

/// Opaque identity of one scan session, created at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a fresh session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a scan.
///
/// `Idle` is the initial state. `Completed`, `Failed` and `Stopped` are
/// terminal: nothing moves out of them except a new start, which creates a
/// brand-new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ScanState {
    /// Whether no further transitions happen without a new start.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Whether a new session may start from this state.
    pub fn can_start(self) -> bool {
        self != Self::Running
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// One run of the external command.
#[derive(Debug, Clone)]
pub struct ScanSession {
    /// Session identity.
    pub id: SessionId,
    /// The command being run.
    pub command: ScanCommand,
    /// Wall-clock start time, for display.
    pub started_at: DateTime<Local>,
    /// Monotonic start time, for durations.
    pub started: Instant,
    /// Current state.
    pub state: ScanState,
    /// Human-readable reason for a failure, if any.
    pub last_error: Option<String>,
    /// Exit code reported by the process, if it exited normally.
    pub exit_code: Option<i32>,
    /// Set once the process handle, reader worker and queue are released.
    pub resources_released: bool,
}

impl ScanSession {
    /// Create a new session in the `Idle` state.
    pub fn new(command: ScanCommand) -> Self {
        Self {
            id: SessionId::new(),
            command,
            started_at: Local::now(),
            started: Instant::now(),
            state: ScanState::Idle,
            last_error: None,
            exit_code: None,
            resources_released: false,
        }
    }

    /// Whole seconds since the session started.
    pub fn elapsed_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}
