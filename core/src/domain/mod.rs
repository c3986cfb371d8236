//! Domain layer - Pure data models for scan sessions.
//!
//! These types have no I/O dependencies and can be tested in isolation.

mod command;
mod output;
mod session;

// Re-export all domain types
pub use command::ScanCommand;
pub use output::{ExitReport, OutputLine, SinkEvent, StreamEvent};
pub use session::{ScanSession, ScanState, SessionId};
