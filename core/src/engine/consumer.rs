//! UI-side drain of the output queue.

use std::sync::mpsc::{Receiver, TryRecvError};

use crate::domain::{ExitReport, StreamEvent};

/// What one drain pulled off the queue.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drained {
    /// Output lines in production order.
    pub lines: Vec<String>,
    /// First line that carried a progress marker.
    pub progress: Option<String>,
    /// The worker's closing report, if it arrived.
    pub finished: Option<ExitReport>,
    /// The worker went away without a closing report.
    pub disconnected: bool,
}

/// Non-blocking, batch-bounded reader of the output queue.
///
/// Never blocks: every queue access is a `try_recv`.
pub struct OutputConsumer {
    rx: Receiver<StreamEvent>,
    batch_size: usize,
    markers: Vec<String>,
    delivered: u64,
    ended: bool,
}

impl OutputConsumer {
    /// Create a consumer draining at most `batch_size` lines per tick.
    pub fn new(rx: Receiver<StreamEvent>, batch_size: usize, markers: Vec<String>) -> Self {
        Self {
            rx,
            batch_size: batch_size.max(1),
            markers,
            delivered: 0,
            ended: false,
        }
    }

    /// Drain up to one batch.
    pub fn drain(&mut self) -> Drained {
        self.take(self.batch_size)
    }

    /// Drain everything currently queued, ignoring the batch bound.
    pub fn flush(&mut self) -> Drained {
        self.take(usize::MAX)
    }

    /// Throw away everything currently queued.
    pub fn discard(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            if matches!(event, StreamEvent::Finished(_)) {
                self.ended = true;
            }
        }
    }

    /// Lines handed out so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    fn take(&mut self, limit: usize) -> Drained {
        let mut drained = Drained::default();
        if self.ended {
            return drained;
        }

        while drained.lines.len() < limit {
            match self.rx.try_recv() {
                Ok(StreamEvent::Line(line)) => {
                    if drained.progress.is_none() && self.is_progress(&line.text) {
                        drained.progress = Some(line.text.clone());
                    }
                    drained.lines.push(line.text);
                }
                Ok(StreamEvent::Finished(report)) => {
                    drained.finished = Some(report);
                    self.ended = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    drained.disconnected = true;
                    self.ended = true;
                    break;
                }
            }
        }

        self.delivered += drained.lines.len() as u64;
        drained
    }

    fn is_progress(&self, text: &str) -> bool {
        self.markers.iter().any(|m| text.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OutputLine;
    use std::sync::mpsc;

    fn markers() -> Vec<String> {
        vec!["Progress:".to_string(), "Timing:".to_string()]
    }

    fn line(seq: u64, text: &str) -> StreamEvent {
        StreamEvent::Line(OutputLine {
            seq,
            text: text.to_string(),
        })
    }

    #[test]
    fn test_drain_respects_batch_size() {
        let (tx, rx) = mpsc::sync_channel(200);
        for i in 0..120 {
            tx.send(line(i, &format!("line {}", i))).unwrap();
        }
        let mut consumer = OutputConsumer::new(rx, 50, markers());

        assert_eq!(consumer.drain().lines.len(), 50);
        assert_eq!(consumer.drain().lines.len(), 50);
        let last = consumer.drain();
        assert_eq!(last.lines.len(), 20);
        assert_eq!(last.lines[19], "line 119");
        assert_eq!(consumer.delivered(), 120);
        assert!(last.finished.is_none());
    }

    #[test]
    fn test_progress_marker_detected() {
        let (tx, rx) = mpsc::sync_channel(8);
        tx.send(line(0, "Starting Nmap")).unwrap();
        tx.send(line(1, "Stats: 0:00:05 elapsed; Timing: About 12.5% done")).unwrap();
        tx.send(line(2, "Progress: 50%")).unwrap();
        let mut consumer = OutputConsumer::new(rx, 50, markers());

        let drained = consumer.drain();
        assert_eq!(drained.lines.len(), 3);
        assert_eq!(
            drained.progress.as_deref(),
            Some("Stats: 0:00:05 elapsed; Timing: About 12.5% done")
        );
    }

    #[test]
    fn test_finished_ends_the_stream() {
        let (tx, rx) = mpsc::sync_channel(8);
        tx.send(line(0, "done")).unwrap();
        tx.send(StreamEvent::Finished(ExitReport {
            exit_code: Some(0),
            ..Default::default()
        }))
        .unwrap();
        let mut consumer = OutputConsumer::new(rx, 50, markers());

        let drained = consumer.drain();
        assert_eq!(consumer.delivered(), 1);
        assert_eq!(drained.lines, vec!["done"]);
        assert_eq!(drained.finished.map(|r| r.exit_code), Some(Some(0)));
        assert_eq!(consumer.drain(), Drained::default());
    }

    #[test]
    fn test_disconnect_without_report() {
        let (tx, rx) = mpsc::sync_channel::<StreamEvent>(8);
        drop(tx);
        let mut consumer = OutputConsumer::new(rx, 50, markers());

        let drained = consumer.drain();
        assert!(drained.disconnected);
        assert!(drained.finished.is_none());
    }

    #[test]
    fn test_flush_ignores_batch_size() {
        let (tx, rx) = mpsc::sync_channel(200);
        for i in 0..120 {
            tx.send(line(i, "x")).unwrap();
        }
        let mut consumer = OutputConsumer::new(rx, 50, markers());

        assert_eq!(consumer.flush().lines.len(), 120);
        assert!(consumer.drain().lines.is_empty());
    }
}
