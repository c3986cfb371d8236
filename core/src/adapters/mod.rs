//! Adapters layer - External system implementations.
//!
//! This module contains implementations of the port traits defined in `ports`.
//! Each adapter handles communication with the operating system or a runtime.

pub mod process;
pub mod scheduler;

// Re-export main types for convenience
pub use process::{ProcessRunner, ProcessStatus, SystemLauncher, WaitOutcome};
pub use scheduler::{ManualScheduler, TokioScheduler};
