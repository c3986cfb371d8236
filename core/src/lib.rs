//! ScanRunner Core Library
//!
//! Runs a long-lived external scan program and streams its output to a user
//! interface without blocking it. Provides functionality to:
//! - Validate scan targets (addresses, CIDR networks, ranges, hostnames)
//! - Launch the scanner and read its merged stdout/stderr on a worker thread
//! - Forward output in bounded batches from a cooperative UI-thread tick
//! - Stop a scan with a polite signal, a grace period and a forced kill
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Pure data models
//! - `ports`: Trait definitions (UI sink, scheduler, process launcher)
//! - `adapters`: OS process and scheduler implementations
//! - `engine`: Streamer, consumer, cancellation and the controller state machine
//!
//! # Platform Support
//! - Unix: the scanner runs in its own process group; stop uses SIGTERM then SIGKILL
//! - Windows: the scanner runs without a console window; stop kills directly

// Hexagonal architecture layers
pub mod adapters;
pub mod domain;
pub mod engine;
pub mod ports;

pub mod config;
pub mod error;
pub mod history;
pub mod validator;

// Re-export domain types (primary API)
pub use domain::{
    ExitReport, OutputLine, ScanCommand, ScanSession, ScanState, SessionId, SinkEvent,
    StreamEvent,
};

// Re-export other commonly used types
pub use adapters::{ManualScheduler, ProcessRunner, SystemLauncher, TokioScheduler};
pub use config::EngineConfig;
pub use engine::{ScanController, ScanRequest, TargetSpec};
pub use error::{Error, Result};
pub use history::{HistoryEntry, ScanHistory};
pub use ports::{LaunchedProcess, ProcessLauncher, ScanSink, Scheduler};
pub use validator::{TargetKind, TargetValidator};
