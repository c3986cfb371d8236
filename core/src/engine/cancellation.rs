//! Stop protocol: polite request, grace period, forced kill.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::adapters::process::ProcessRunner;
use crate::domain::{ExitReport, ScanState};
use crate::error::Error;

/// Closing line and detail for a user stop.
pub const TERMINATED_BY_USER: &str = "Scan terminated by user.";

/// Closing line for a clean exit.
pub const COMPLETED_SUCCESSFULLY: &str = "Scan completed successfully.";

/// Why a stop was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The user asked for it.
    User,
    /// The session ran past its configured duration bound.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Requested {
        reason: CancelReason,
        deadline: Instant,
    },
    Escalated {
        reason: CancelReason,
    },
}

/// Final state of a session plus the text that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub state: ScanState,
    /// Context for `on_state_change`.
    pub detail: String,
    /// Line appended to the output stream, if any.
    pub closing_line: Option<String>,
}

/// Drives one session's stop protocol from the UI thread.
///
/// `request` sets the shared flag and sends the polite signal; `poll` is
/// called every tick and escalates to a kill once the grace period has run
/// out. Nothing here ever sleeps.
#[derive(Debug)]
pub struct CancellationManager {
    flag: Arc<AtomicBool>,
    grace: Duration,
    phase: Phase,
    requests: u32,
    kills: u32,
}

impl CancellationManager {
    /// Create a manager with the given grace period.
    pub fn new(grace: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            grace,
            phase: Phase::Idle,
            requests: 0,
            kills: 0,
        }
    }

    /// Flag shared with the reader worker.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Start the stop protocol.
    ///
    /// Only the first request signals the process; later ones are counted
    /// and otherwise ignored. Returns whether this call started it.
    pub fn request(&mut self, reason: CancelReason, runner: &ProcessRunner) -> bool {
        self.requests += 1;
        if self.phase != Phase::Idle {
            debug!(pid = runner.pid(), requests = self.requests, "Stop already in progress");
            return false;
        }

        info!(
            pid = runner.pid(),
            reason = ?reason,
            grace_ms = self.grace.as_millis() as u64,
            "Stopping scan"
        );
        self.flag.store(true, Ordering::SeqCst);
        self.phase = Phase::Requested {
            reason,
            deadline: Instant::now() + self.grace,
        };

        if let Err(e) = runner.terminate() {
            warn!(pid = runner.pid(), error = %e, "Polite stop failed, killing now");
            self.escalate(reason, runner);
        }
        true
    }

    /// Escalate to a kill if the grace period ran out.
    ///
    /// The kill goes out even when the leader has already exited: the
    /// session is still open, so something in its group holds the output.
    /// Returns whether a kill was issued by this call.
    pub fn poll(&mut self, runner: &ProcessRunner) -> bool {
        let Phase::Requested { reason, deadline } = self.phase else {
            return false;
        };
        if Instant::now() < deadline {
            return false;
        }

        warn!(pid = runner.pid(), leader = ?runner.poll(), "Grace period expired");
        self.escalate(reason, runner);
        true
    }

    fn escalate(&mut self, reason: CancelReason, runner: &ProcessRunner) {
        runner.kill();
        self.kills += 1;
        self.phase = Phase::Escalated { reason };
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Reason of the first request, if any.
    pub fn reason(&self) -> Option<CancelReason> {
        match self.phase {
            Phase::Idle => None,
            Phase::Requested { reason, .. } | Phase::Escalated { reason } => Some(reason),
        }
    }

    /// Number of stop requests received.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Number of kills issued.
    pub fn kills(&self) -> u32 {
        self.kills
    }

    /// Decide the terminal state for a finished worker.
    ///
    /// A user stop always ends in `Stopped`, whatever the exit code. A
    /// stream error only matters when the process itself failed.
    pub fn resolve(
        &self,
        report: &ExitReport,
        elapsed_secs: u64,
        limit_secs: Option<u64>,
    ) -> Outcome {
        if let Some(panic) = &report.worker_panic {
            return Outcome {
                state: ScanState::Failed,
                detail: Error::Stream(panic.clone()).to_string(),
                closing_line: None,
            };
        }

        match self.reason() {
            Some(CancelReason::User) => {
                return Outcome {
                    state: ScanState::Stopped,
                    detail: TERMINATED_BY_USER.to_string(),
                    closing_line: Some(TERMINATED_BY_USER.to_string()),
                };
            }
            Some(CancelReason::Timeout) => {
                let message = format!(
                    "Scan timed out after {} seconds",
                    limit_secs.unwrap_or(elapsed_secs)
                );
                return Outcome {
                    state: ScanState::Failed,
                    detail: message.clone(),
                    closing_line: Some(message),
                };
            }
            None => {}
        }

        match report.exit_code {
            Some(0) => Outcome {
                state: ScanState::Completed,
                detail: format!("Scan completed in {} seconds", elapsed_secs),
                closing_line: Some(COMPLETED_SUCCESSFULLY.to_string()),
            },
            Some(code) => {
                let message = Error::Runtime { code }.to_string();
                let detail = match &report.stream_error {
                    Some(stream) => format!("{} ({})", message, Error::Stream(stream.clone())),
                    None => message.clone(),
                };
                Outcome {
                    state: ScanState::Failed,
                    detail,
                    closing_line: Some(message),
                }
            }
            None => {
                let message = "Scan process was terminated by a signal".to_string();
                Outcome {
                    state: ScanState::Failed,
                    detail: message.clone(),
                    closing_line: Some(message),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i32) -> ExitReport {
        ExitReport {
            exit_code: Some(code),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_exit_completes() {
        let manager = CancellationManager::new(Duration::from_secs(5));
        let outcome = manager.resolve(&exited(0), 42, None);
        assert_eq!(outcome.state, ScanState::Completed);
        assert_eq!(outcome.detail, "Scan completed in 42 seconds");
        assert_eq!(outcome.closing_line.as_deref(), Some(COMPLETED_SUCCESSFULLY));
    }

    #[test]
    fn test_stream_error_ignored_on_clean_exit() {
        let manager = CancellationManager::new(Duration::from_secs(5));
        let report = ExitReport {
            exit_code: Some(0),
            stream_error: Some("pipe broke".to_string()),
            ..Default::default()
        };
        assert_eq!(manager.resolve(&report, 1, None).state, ScanState::Completed);
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let manager = CancellationManager::new(Duration::from_secs(5));
        let outcome = manager.resolve(&exited(2), 1, None);
        assert_eq!(outcome.state, ScanState::Failed);
        assert_eq!(outcome.detail, "Scan failed with return code 2");

        let report = ExitReport {
            exit_code: Some(1),
            stream_error: Some("pipe broke".to_string()),
            ..Default::default()
        };
        let outcome = manager.resolve(&report, 1, None);
        assert_eq!(
            outcome.detail,
            "Scan failed with return code 1 (Error during scan: pipe broke)"
        );
        assert_eq!(outcome.closing_line.as_deref(), Some("Scan failed with return code 1"));
    }

    #[test]
    fn test_worker_panic_fails() {
        let manager = CancellationManager::new(Duration::from_secs(5));
        let report = ExitReport {
            exit_code: Some(0),
            worker_panic: Some("boom".to_string()),
            ..Default::default()
        };
        let outcome = manager.resolve(&report, 0, None);
        assert_eq!(outcome.state, ScanState::Failed);
        assert_eq!(outcome.detail, "Error during scan: boom");
        assert!(outcome.closing_line.is_none());
    }

    #[test]
    fn test_signal_exit_without_request_fails() {
        let manager = CancellationManager::new(Duration::from_secs(5));
        let outcome = manager.resolve(&ExitReport::default(), 3, None);
        assert_eq!(outcome.state, ScanState::Failed);
    }

    #[test]
    fn test_fresh_manager_has_no_request() {
        let manager = CancellationManager::new(Duration::from_secs(5));
        assert!(!manager.is_requested());
        assert!(manager.reason().is_none());
        assert!(!manager.flag().load(Ordering::SeqCst));
        assert_eq!(manager.requests(), 0);
        assert_eq!(manager.kills(), 0);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::domain::ScanCommand;

        fn spawn(script: &str) -> ProcessRunner {
            ProcessRunner::spawn(&ScanCommand::new("sh", ["-c", script]))
                .unwrap()
                .0
        }

        #[test]
        fn test_user_stop_resolves_to_stopped_even_on_failure_code() {
            let runner = spawn("sleep 30");
            let mut manager = CancellationManager::new(Duration::from_secs(5));

            assert!(manager.request(CancelReason::User, &runner));
            assert!(manager.flag().load(Ordering::SeqCst));
            let code = runner.wait();

            let outcome = manager.resolve(
                &ExitReport {
                    exit_code: code,
                    ..Default::default()
                },
                0,
                None,
            );
            assert_eq!(outcome.state, ScanState::Stopped);
            assert_eq!(outcome.detail, TERMINATED_BY_USER);
            assert_eq!(manager.kills(), 0);
        }

        #[test]
        fn test_repeated_requests_collapse() {
            let runner = spawn("sleep 30");
            let mut manager = CancellationManager::new(Duration::from_secs(5));

            assert!(manager.request(CancelReason::User, &runner));
            assert!(!manager.request(CancelReason::User, &runner));
            assert!(!manager.request(CancelReason::Timeout, &runner));
            assert_eq!(manager.requests(), 3);
            assert_eq!(manager.reason(), Some(CancelReason::User));
            runner.wait();
        }

        #[test]
        fn test_escalates_after_grace() {
            let runner = spawn("trap '' TERM; while :; do sleep 1; done");
            let mut manager = CancellationManager::new(Duration::from_millis(200));

            manager.request(CancelReason::User, &runner);
            assert!(!manager.poll(&runner));

            std::thread::sleep(Duration::from_millis(300));
            assert!(manager.poll(&runner));
            assert!(!manager.poll(&runner));
            assert_eq!(manager.kills(), 1);

            assert!(matches!(
                runner.wait_timeout(Some(Duration::from_secs(5))),
                crate::adapters::process::WaitOutcome::Exited(_)
            ));
        }

        #[test]
        fn test_escalation_kills_group_after_leader_exit() {
            let (runner, mut reader) = ProcessRunner::spawn(&ScanCommand::new(
                "sh",
                ["-c", "trap '' TERM; sleep 30 & exit 0"],
            ))
            .unwrap();
            assert_eq!(runner.wait(), Some(0));

            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let mut rest = Vec::new();
                let _ = std::io::Read::read_to_end(&mut reader, &mut rest);
                let _ = tx.send(());
            });

            let mut manager = CancellationManager::new(Duration::from_millis(200));
            manager.request(CancelReason::User, &runner);
            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

            std::thread::sleep(Duration::from_millis(300));
            assert!(manager.poll(&runner));
            assert_eq!(manager.kills(), 1);
            assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        }

        #[test]
        fn test_timeout_resolves_to_failed() {
            let runner = spawn("sleep 30");
            let mut manager = CancellationManager::new(Duration::from_secs(5));
            manager.request(CancelReason::Timeout, &runner);
            runner.wait();

            let outcome = manager.resolve(&ExitReport::default(), 11, Some(10));
            assert_eq!(outcome.state, ScanState::Failed);
            assert_eq!(outcome.detail, "Scan timed out after 10 seconds");
        }
    }
}
