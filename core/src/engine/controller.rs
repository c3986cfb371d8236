//! Top-level scan state machine.
//!
//! `ScanController` owns the current session together with the resources of
//! its run. It lives on the host's single UI thread: ticks are scheduled
//! through the [`Scheduler`] port, and [`ScanSink`] callbacks only ever fire
//! from those ticks or from `start`/`stop`.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::adapters::process::{ProcessRunner, ProcessStatus, SystemLauncher, WaitOutcome};
use crate::config::EngineConfig;
use crate::domain::{ExitReport, ScanCommand, ScanSession, ScanState, SessionId, SinkEvent};
use crate::engine::cancellation::{CancelReason, CancellationManager};
use crate::engine::consumer::OutputConsumer;
use crate::engine::streamer;
use crate::error::{Error, Result};
use crate::history::ScanHistory;
use crate::ports::{LaunchedProcess, ProcessLauncher, ScanSink, Scheduler};
use crate::validator::{split_targets, TargetValidator};

/// How long finalize waits for a process the worker reported as gone.
const REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// How long teardown on drop waits for the reader worker.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Requests
// =============================================================================

/// Where the targets of a scan come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    /// Comma-separated targets, validated one by one.
    List(String),
    /// A file of targets handed to the scanner as-is. Only its existence is checked.
    File(PathBuf),
}

/// Everything `start` needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub command: ScanCommand,
    pub targets: TargetSpec,
}

impl ScanRequest {
    /// Request a scan of a comma-separated target list.
    pub fn new(command: ScanCommand, targets: impl Into<String>) -> Self {
        Self {
            command,
            targets: TargetSpec::List(targets.into()),
        }
    }

    /// Request a scan whose targets live in a file.
    pub fn with_target_file(command: ScanCommand, path: impl Into<PathBuf>) -> Self {
        Self {
            command,
            targets: TargetSpec::File(path.into()),
        }
    }
}

// =============================================================================
// Internal state
// =============================================================================

/// Resources of a non-terminal session. Released together.
struct ActiveRun {
    runner: Arc<ProcessRunner>,
    consumer: OutputConsumer,
    cancellation: CancellationManager,
    worker: Option<JoinHandle<()>>,
    /// When a tick first saw the leader exited while the output was open.
    leader_exited: Option<Instant>,
    /// Whether the group was killed to close the output.
    group_killed: bool,
    /// Start of the current stretch of ticks that drained nothing.
    quiet_since: Option<Instant>,
}

impl ActiveRun {
    fn worker_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Bound the wait for end-of-stream once the leader has exited.
    ///
    /// Background children can keep the pipe open after the scan process
    /// exits. One grace period after the exit the group is killed. If the
    /// output then stays open and silent for another grace period, the
    /// worker is abandoned and the returned report finalizes the session.
    fn watch_leader(&mut self, grace: Duration, drained: usize) -> Option<ExitReport> {
        if self.worker_finished() {
            return None;
        }
        let ProcessStatus::Exited(exit_code) = self.runner.poll() else {
            return None;
        };

        let now = Instant::now();
        let exited = *self.leader_exited.get_or_insert(now);
        if !self.group_killed {
            if now.duration_since(exited) >= grace {
                warn!(
                    pid = self.runner.pid(),
                    "Scan process exited but its output is still open, killing its group"
                );
                self.runner.kill();
                self.group_killed = true;
                self.quiet_since = Some(now);
            }
            return None;
        }

        if drained > 0 {
            self.quiet_since = Some(now);
            return None;
        }
        let quiet = *self.quiet_since.get_or_insert(now);
        if now.duration_since(quiet) < grace {
            return None;
        }

        error!(pid = self.runner.pid(), "Output still open after group kill, detaching reader");
        self.worker = None;
        Some(ExitReport {
            exit_code,
            stream_error: Some("output stayed open after the scan process exited".to_string()),
            worker_panic: None,
            lines_read: self.consumer.delivered(),
        })
    }

    /// Join the reader worker. Returns `false` when it had been abandoned.
    fn join(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return false;
        };
        if worker.join().is_err() {
            error!(pid = self.runner.pid(), "Reader worker could not be joined");
        }
        true
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        debug!(pid = self.runner.pid(), "Tearing down running scan");
        self.cancellation.flag().store(true, Ordering::SeqCst);
        self.runner.kill();

        // Keep the queue moving so a worker blocked on a full queue can finish.
        let deadline = Instant::now() + TEARDOWN_TIMEOUT;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!(pid = self.runner.pid(), "Reader worker still busy, detaching it");
                return;
            }
            self.consumer.discard();
            std::thread::sleep(Duration::from_millis(5));
        }
        let _ = worker.join();
    }
}

struct Inner {
    config: EngineConfig,
    validator: TargetValidator,
    launcher: Box<dyn ProcessLauncher>,
    session: Option<ScanSession>,
    run: Option<ActiveRun>,
    history: ScanHistory,
    worker_joined: bool,
    spawned: u64,
}

impl Inner {
    fn state(&self) -> ScanState {
        self.session.as_ref().map(|s| s.state).unwrap_or_default()
    }
}

struct Shared<S> {
    inner: RefCell<Inner>,
    sink: RefCell<S>,
    scheduler: Rc<dyn Scheduler>,
    /// Events waiting for the sink, in emission order.
    pending: RefCell<VecDeque<SinkEvent>>,
}

// =============================================================================
// ScanController
// =============================================================================

/// Runs at most one scan at a time and reports to a [`ScanSink`].
///
/// # State machine
/// ```text
/// Idle ──start──▶ Running ──exit 0──────▶ Completed
///   │                │ ────exit != 0────▶ Failed
///   │                └─────stop─────────▶ Stopped
///   └─launch error──────────────────────▶ Failed
/// ```
/// A terminal state goes back to `Running` only through a new `start`, which
/// creates a new session.
pub struct ScanController<S: ScanSink + 'static> {
    shared: Rc<Shared<S>>,
}

impl<S: ScanSink + 'static> ScanController<S> {
    /// Create a controller that spawns real processes.
    pub fn new(config: EngineConfig, sink: S, scheduler: Rc<dyn Scheduler>) -> Result<Self> {
        Self::with_launcher(config, sink, scheduler, Box::new(SystemLauncher::new()))
    }

    /// Create a controller with a custom process launcher.
    pub fn with_launcher(
        config: EngineConfig,
        sink: S,
        scheduler: Rc<dyn Scheduler>,
        launcher: Box<dyn ProcessLauncher>,
    ) -> Result<Self> {
        config.validate()?;

        let inner = Inner {
            validator: TargetValidator::with_limit(config.validation_cache_limit),
            history: ScanHistory::new(config.history_limit),
            config,
            launcher,
            session: None,
            run: None,
            worker_joined: true,
            spawned: 0,
        };

        Ok(Self {
            shared: Rc::new(Shared {
                inner: RefCell::new(inner),
                sink: RefCell::new(sink),
                scheduler,
                pending: RefCell::new(VecDeque::new()),
            }),
        })
    }

    /// Validate the targets and launch the command.
    ///
    /// Rejections leave the controller untouched apart from the validation
    /// cache. A launch failure moves straight to `Failed`.
    pub fn start(&self, request: ScanRequest) -> Result<SessionId> {
        let result = self.shared.start(request);
        self.shared.dispatch();

        if let Ok(id) = result {
            let delay = self.shared.inner.borrow().config.tick_interval();
            self.shared.schedule_tick(id, delay);
        }
        result
    }

    /// Ask the running scan to stop.
    ///
    /// Idempotent: repeated calls while stopping, and calls after the session
    /// ended, do nothing. Fails only when no scan was ever started.
    pub fn stop(&self) -> Result<()> {
        let result = self.shared.stop();
        self.shared.dispatch();
        result
    }

    /// Check a comma-separated target list without starting anything.
    ///
    /// Shares the cache used by `start`.
    pub fn validate_targets(&self, targets: &str) -> Vec<String> {
        self.shared.inner.borrow_mut().validator.validate_all(targets)
    }

    /// State of the current session, or `Idle` if there is none.
    pub fn state(&self) -> ScanState {
        self.shared.inner.borrow().state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ScanState::Running
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Option<ScanSession> {
        self.shared.inner.borrow().session.clone()
    }

    /// Whether the last session's reader worker has been joined.
    pub fn worker_joined(&self) -> bool {
        self.shared.inner.borrow().worker_joined
    }

    /// Number of processes launched over the controller's lifetime.
    pub fn spawn_count(&self) -> u64 {
        self.shared.inner.borrow().spawned
    }

    /// Number of targets actually parsed by the validator.
    pub fn validation_computations(&self) -> u64 {
        self.shared.inner.borrow().validator.computations()
    }

    /// Stop requests and forced kills for the current session.
    pub fn cancellation_counts(&self) -> Option<(u32, u32)> {
        let inner = self.shared.inner.borrow();
        inner
            .run
            .as_ref()
            .map(|run| (run.cancellation.requests(), run.cancellation.kills()))
    }

    pub fn history(&self) -> Ref<'_, ScanHistory> {
        Ref::map(self.shared.inner.borrow(), |inner| &inner.history)
    }

    pub fn clear_history(&self) {
        self.shared.inner.borrow_mut().history.clear();
    }

    pub fn config(&self) -> EngineConfig {
        self.shared.inner.borrow().config.clone()
    }

    pub fn sink(&self) -> Ref<'_, S> {
        self.shared.sink.borrow()
    }

    pub fn sink_mut(&self) -> RefMut<'_, S> {
        self.shared.sink.borrow_mut()
    }
}

impl<S: ScanSink + 'static> Shared<S> {
    fn emit(&self, event: SinkEvent) {
        self.pending.borrow_mut().push_back(event);
    }

    /// Hand queued events to the sink. Must run with `inner` unborrowed.
    fn dispatch(&self) {
        // A sink that re-enters the controller leaves its events queued for
        // the outer loop.
        let Ok(mut sink) = self.sink.try_borrow_mut() else {
            return;
        };
        loop {
            let Some(event) = self.pending.borrow_mut().pop_front() else {
                break;
            };
            sink.deliver(&event);
        }
    }

    fn start(&self, request: ScanRequest) -> Result<SessionId> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let previous = inner.state();
        if !previous.can_start() {
            debug!("Start rejected, scan already running");
            return Err(Error::AlreadyRunning);
        }
        if let Err(e) = request.command.ensure_runnable() {
            self.emit(SinkEvent::StateChange {
                old: previous,
                new: previous,
                detail: e.to_string(),
            });
            return Err(e);
        }

        match &request.targets {
            TargetSpec::List(targets) => {
                if split_targets(targets).next().is_none() {
                    self.emit(SinkEvent::ValidationRejected { invalid: Vec::new() });
                    return Err(Error::NoTargets);
                }
                let invalid = inner.validator.validate_all(targets);
                if !invalid.is_empty() {
                    info!(count = invalid.len(), "Targets rejected");
                    self.emit(SinkEvent::ValidationRejected {
                        invalid: invalid.clone(),
                    });
                    return Err(Error::Validation { invalid });
                }
            }
            TargetSpec::File(path) => {
                if !path.exists() {
                    self.emit(SinkEvent::ValidationRejected {
                        invalid: vec![path.display().to_string()],
                    });
                    return Err(Error::TargetFileNotFound(path.clone()));
                }
            }
        }

        let mut session = ScanSession::new(request.command);
        inner.history.record(&session);

        let run = match inner.launcher.launch(&session.command) {
            Ok(launched) => {
                inner.spawned += 1;
                Self::begin_run(session.id, &inner.config, launched)
            }
            Err(e) => Err(e),
        };

        match run {
            Ok(run) => {
                info!(
                    session = %session.id,
                    pid = run.runner.pid(),
                    command = %session.command,
                    "Scan started"
                );
                session.state = ScanState::Running;
                let id = session.id;
                let detail = format!("Scan started: {}", session.command);
                inner.session = Some(session);
                inner.run = Some(run);
                inner.worker_joined = false;
                self.emit(SinkEvent::StateChange {
                    old: previous,
                    new: ScanState::Running,
                    detail,
                });
                Ok(id)
            }
            Err(e) => {
                warn!(session = %session.id, error = %e, "Scan failed to launch");
                session.state = ScanState::Failed;
                session.last_error = Some(e.to_string());
                session.resources_released = true;
                inner.history.complete(session.id, ScanState::Failed);
                inner.session = Some(session);
                self.emit(SinkEvent::StateChange {
                    old: previous,
                    new: ScanState::Failed,
                    detail: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Wire the queue, cancellation flag and reader worker around a process.
    fn begin_run(
        id: SessionId,
        config: &EngineConfig,
        launched: LaunchedProcess,
    ) -> Result<ActiveRun> {
        let LaunchedProcess { runner, output } = launched;
        let runner = Arc::new(runner);
        let (tx, rx) = mpsc::sync_channel(config.queue_capacity);
        let cancellation = CancellationManager::new(config.grace_period());

        let worker =
            streamer::spawn_worker(id, Arc::clone(&runner), output, tx, cancellation.flag())
                .map_err(|e| {
                    runner.kill();
                    runner.wait_timeout(Some(REAP_TIMEOUT));
                    Error::Launch {
                        program: runner.program().to_string(),
                        source: e,
                    }
                })?;

        Ok(ActiveRun {
            runner,
            consumer: OutputConsumer::new(rx, config.batch_size, config.progress_markers.clone()),
            cancellation,
            worker: Some(worker),
            leader_exited: None,
            group_killed: false,
            quiet_since: None,
        })
    }

    fn stop(&self) -> Result<()> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let Some(session) = &inner.session else {
            return Err(Error::NoActiveScan);
        };
        if session.state.is_terminal() {
            debug!(
                session = %session.id,
                state = %session.state,
                "Stop ignored, scan already finished"
            );
            return Ok(());
        }

        if let Some(run) = inner.run.as_mut() {
            run.cancellation.request(CancelReason::User, &run.runner);
        }
        Ok(())
    }

    fn schedule_tick(self: &Rc<Self>, id: SessionId, delay: Duration) {
        let weak: Weak<Self> = Rc::downgrade(self);
        self.scheduler.schedule_after(
            delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.tick(id);
                }
            }),
        );
    }

    /// One consumer tick for session `id`.
    fn tick(self: &Rc<Self>, id: SessionId) {
        let next = self.step(id);
        self.dispatch();
        if let Some(delay) = next {
            self.schedule_tick(id, delay);
        }
    }

    /// Drain, escalate and maybe finalize. Returns the delay to the next tick,
    /// or `None` once the session is terminal.
    fn step(&self, id: SessionId) -> Option<Duration> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let session = inner.session.as_ref().filter(|s| s.id == id)?;
        let started = session.started;
        let run = inner.run.as_mut()?;

        let drained = run.consumer.drain();
        let batch = drained.lines.len();
        if batch > 0 {
            self.emit(SinkEvent::OutputBatch {
                lines: drained.lines,
            });
        }
        if let Some(status) = drained.progress {
            self.emit(SinkEvent::Progress { status });
        }

        if let Some(limit) = inner.config.max_duration() {
            if !run.cancellation.is_requested() && started.elapsed() >= limit {
                warn!(session = %id, limit_secs = limit.as_secs(), "Scan exceeded its time limit");
                run.cancellation.request(CancelReason::Timeout, &run.runner);
            }
        }
        run.cancellation.poll(&run.runner);

        let report = match (drained.finished, drained.disconnected) {
            (Some(report), _) => report,
            (None, true) => {
                error!(session = %id, "Reader worker stopped without a report");
                run.runner.kill();
                let exit_code = match run.runner.wait_timeout(Some(REAP_TIMEOUT)) {
                    WaitOutcome::Exited(code) => code,
                    WaitOutcome::TimedOut => None,
                };
                ExitReport {
                    exit_code,
                    worker_panic: Some("reader worker stopped without a report".to_string()),
                    ..Default::default()
                }
            }
            (None, false) => match run.watch_leader(inner.config.grace_period(), batch) {
                Some(report) => report,
                None => return Some(inner.config.tick_interval()),
            },
        };

        self.finalize(inner, report);
        None
    }

    /// Flush, resolve, release and transition. Runs once per session.
    fn finalize(&self, inner: &mut Inner, report: ExitReport) {
        let Some(mut run) = inner.run.take() else {
            return;
        };
        let Some(session) = inner.session.as_mut() else {
            return;
        };

        let rest = run.consumer.flush();
        let mut tail = rest.lines;

        let outcome = run
            .cancellation
            .resolve(&report, session.elapsed_secs(), inner.config.max_duration_secs);
        if let Some(line) = &outcome.closing_line {
            tail.push(line.clone());
        }
        if !tail.is_empty() {
            self.emit(SinkEvent::OutputBatch { lines: tail });
        }

        run.runner.kill();
        inner.worker_joined = run.join();
        drop(run);

        session.state = outcome.state;
        session.exit_code = report.exit_code;
        session.resources_released = true;
        if outcome.state == ScanState::Failed {
            session.last_error = Some(outcome.detail.clone());
        }
        inner.history.complete(session.id, outcome.state);

        info!(
            session = %session.id,
            state = %outcome.state,
            exit_code = ?report.exit_code,
            lines = report.lines_read,
            "Scan finished"
        );
        self.emit(SinkEvent::StateChange {
            old: ScanState::Running,
            new: outcome.state,
            detail: outcome.detail,
        });
    }
}
