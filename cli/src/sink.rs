//! Terminal sink - prints engine notifications.

use scanrunner_core::{ScanSink, ScanState, SinkEvent};

/// Prints output to stdout and status to stderr.
///
/// In JSON mode every notification is printed as one JSON object per line.
pub struct TerminalSink {
    json: bool,
}

impl TerminalSink {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn print_json(&self, event: &SinkEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
        }
    }
}

impl ScanSink for TerminalSink {
    fn on_output_batch(&mut self, lines: &[String]) {
        if self.json {
            self.print_json(&SinkEvent::OutputBatch {
                lines: lines.to_vec(),
            });
            return;
        }
        for line in lines {
            println!("{}", line);
        }
    }

    fn on_progress(&mut self, status: &str) {
        if self.json {
            self.print_json(&SinkEvent::Progress {
                status: status.to_string(),
            });
        } else {
            eprintln!("[progress] {}", status);
        }
    }

    fn on_state_change(&mut self, old: ScanState, new: ScanState, detail: &str) {
        if self.json {
            self.print_json(&SinkEvent::StateChange {
                old,
                new,
                detail: detail.to_string(),
            });
        } else {
            eprintln!("[{} -> {}] {}", old, new, detail);
        }
    }

    fn on_validation_rejected(&mut self, invalid: &[String]) {
        if self.json {
            self.print_json(&SinkEvent::ValidationRejected {
                invalid: invalid.to_vec(),
            });
        } else if invalid.is_empty() {
            eprintln!("No valid targets specified");
        } else {
            eprintln!("Invalid targets found: {}", invalid.join(", "));
        }
    }
}
