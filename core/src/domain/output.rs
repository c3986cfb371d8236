//! Output and notification models exchanged between the engine layers.

use serde::Serialize;

use super::ScanState;

/// A single line captured from the process output, with its arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Position of the line in the stream, starting at 0.
    pub seq: u64,
    /// Line text without the trailing newline.
    pub text: String,
}

/// How the reader worker finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, or `None` if the process was ended by a signal.
    pub exit_code: Option<i32>,
    /// Read failure observed mid-stream, if any.
    pub stream_error: Option<String>,
    /// Panic message if the worker itself failed.
    pub worker_panic: Option<String>,
    /// Number of lines the worker pushed, including synthetic ones.
    pub lines_read: u64,
}

/// Message sent from the reader worker to the consumer.
///
/// `Finished` is always the last message a worker sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Line(OutputLine),
    Finished(ExitReport),
}

/// Notification delivered to a [`ScanSink`](crate::ports::ScanSink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SinkEvent {
    /// A batch of output lines, in production order.
    OutputBatch { lines: Vec<String> },
    /// A progress line spotted in the output.
    Progress { status: String },
    /// A state transition.
    StateChange {
        old: ScanState,
        new: ScanState,
        detail: String,
    },
    /// Targets rejected before anything was spawned.
    ValidationRejected { invalid: Vec<String> },
}
