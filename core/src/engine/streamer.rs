//! Background reader that turns the process output into queued lines.

use std::io::{BufRead, BufReader, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::adapters::process::ProcessRunner;
use crate::domain::{ExitReport, OutputLine, SessionId, StreamEvent};
use crate::error::Error;

/// How a read loop ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Lines pushed, including a synthetic error line.
    pub lines: u64,
    /// Read failure, if the loop stopped on one.
    pub error: Option<String>,
    /// Whether the loop stopped because cancellation was observed.
    pub cancelled: bool,
}

/// Reads one line at a time from a stream and pushes it onto the queue.
///
/// The cancellation flag is checked before every read, so once it is set at
/// most one more blocking read happens. That read returns as soon as the
/// process side of the pipe closes.
pub struct OutputStreamer<R> {
    reader: Option<BufReader<R>>,
    tx: SyncSender<StreamEvent>,
    cancel: Arc<AtomicBool>,
    next_seq: u64,
}

impl<R: Read> OutputStreamer<R> {
    /// Create a streamer over `reader` feeding `tx`.
    pub fn new(reader: R, tx: SyncSender<StreamEvent>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            tx,
            cancel,
            next_seq: 0,
        }
    }

    /// Read until the stream ends or cancellation is observed.
    ///
    /// The reader is closed on return. A read error is pushed as one final
    /// `Error during scan: <message>` line.
    pub fn run(&mut self) -> StreamSummary {
        let mut summary = StreamSummary::default();
        let Some(mut reader) = self.reader.take() else {
            return summary;
        };
        let mut buf = Vec::new();

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                debug!(lines = self.next_seq, "Cancellation observed, stopping reader");
                summary.cancelled = true;
                break;
            }

            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(trim_line_ending(&buf)).into_owned();
                    if !self.push(text) {
                        debug!("Output queue closed, stopping reader");
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Read failed mid-stream");
                    let message = e.to_string();
                    self.push(Error::Stream(message.clone()).to_string());
                    summary.error = Some(message);
                    break;
                }
            }
        }

        summary.lines = self.next_seq;
        summary
    }

    /// Push one line. Returns `false` once the consumer side is gone.
    pub fn push(&mut self, text: String) -> bool {
        let line = OutputLine {
            seq: self.next_seq,
            text,
        };
        self.next_seq += 1;
        self.tx.send(StreamEvent::Line(line)).is_ok()
    }

    /// Number of lines pushed so far.
    pub fn pushed(&self) -> u64 {
        self.next_seq
    }

    /// Send the closing report. Nothing may be pushed after this.
    pub fn finish(self, report: ExitReport) {
        let _ = self.tx.send(StreamEvent::Finished(report));
    }
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

/// Spawn the per-session worker thread.
///
/// The worker streams the output, waits for the process to exit and sends
/// [`StreamEvent::Finished`] as its last message. A panic inside the worker
/// is caught, the process is killed, and the panic is reported as a stream
/// error line plus a `worker_panic` in the report.
pub fn spawn_worker<R>(
    session: SessionId,
    runner: Arc<ProcessRunner>,
    output: R,
    tx: SyncSender<StreamEvent>,
    cancel: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("scan-reader-{}", session))
        .spawn(move || {
            let mut streamer = OutputStreamer::new(output, tx, cancel);

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let summary = streamer.run();
                let exit_code = runner.wait();
                (summary, exit_code)
            }));

            let report = match result {
                Ok((summary, exit_code)) => {
                    debug!(
                        session = %session,
                        exit_code = ?exit_code,
                        lines = summary.lines,
                        "Reader worker done"
                    );
                    ExitReport {
                        exit_code,
                        stream_error: summary.error,
                        worker_panic: None,
                        lines_read: streamer.pushed(),
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(session = %session, panic = %message, "Reader worker panicked");
                    runner.kill();
                    let exit_code = runner.wait();
                    streamer.push(Error::Stream(message.clone()).to_string());
                    ExitReport {
                        exit_code,
                        stream_error: Some(message.clone()),
                        worker_panic: Some(message),
                        lines_read: streamer.pushed(),
                    }
                }
            };

            streamer.finish(report);
        })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "reader worker panicked".to_string()
    }
}
