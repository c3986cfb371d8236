//! UI sink port (interface).

use crate::domain::{ScanState, SinkEvent};

/// Port for delivering scan output and state to the user interface.
///
/// Every method is called from the single UI thread that owns the
/// [`ScanController`](crate::engine::ScanController), never from the reader
/// worker.
pub trait ScanSink {
    /// A batch of output lines, at consumer-tick cadence.
    fn on_output_batch(&mut self, lines: &[String]);

    /// A progress line (e.g. `Stats: ... Timing: About 12% done`) spotted in the output.
    fn on_progress(&mut self, _status: &str) {}

    /// A state transition with human-readable context.
    fn on_state_change(&mut self, old: ScanState, new: ScanState, detail: &str);

    /// Targets rejected at start, before any process was spawned.
    fn on_validation_rejected(&mut self, invalid: &[String]);

    /// Deliver a recorded event to the matching callback.
    fn deliver(&mut self, event: &SinkEvent) {
        match event {
            SinkEvent::OutputBatch { lines } => self.on_output_batch(lines),
            SinkEvent::Progress { status } => self.on_progress(status),
            SinkEvent::StateChange { old, new, detail } => self.on_state_change(*old, *new, detail),
            SinkEvent::ValidationRejected { invalid } => self.on_validation_rejected(invalid),
        }
    }
}

/// Collects every event, in order. Useful for hosts that poll instead of
/// reacting to callbacks.
impl ScanSink for Vec<SinkEvent> {
    fn on_output_batch(&mut self, lines: &[String]) {
        self.push(SinkEvent::OutputBatch {
            lines: lines.to_vec(),
        });
    }

    fn on_progress(&mut self, status: &str) {
        self.push(SinkEvent::Progress {
            status: status.to_string(),
        });
    }

    fn on_state_change(&mut self, old: ScanState, new: ScanState, detail: &str) {
        self.push(SinkEvent::StateChange {
            old,
            new,
            detail: detail.to_string(),
        });
    }

    fn on_validation_rejected(&mut self, invalid: &[String]) {
        self.push(SinkEvent::ValidationRejected {
            invalid: invalid.to_vec(),
        });
    }
}
