//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces the engine uses to talk to its
//! collaborators. Implementations live in `adapters` or in the host
//! application.

mod launcher;
mod scheduler;
mod sink;

pub use launcher::{LaunchedProcess, ProcessLauncher};
pub use scheduler::{Scheduler, Task};
pub use sink::ScanSink;
