//! Process runner for the external scan program.
//!
//! # Stop Pattern
//!
//! Stopping follows the usual two-step pattern:
//! 1. `terminate()` sends SIGTERM to the process group (a polite request)
//! 2. `kill()` sends SIGKILL to the group and kills the child directly
//!
//! The child is started in its own process group on unix so that both
//! signals also reach anything the scanner forked, including background
//! children that outlive it. On Windows there is no
//! polite signal and `terminate()` kills immediately.

use std::io::{self, PipeReader};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::ScanCommand;
use crate::error::{Error, Result};
use crate::ports::{LaunchedProcess, ProcessLauncher};

/// How often a blocking wait re-checks the child.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Liveness of a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Still running.
    Running,
    /// Exited and reaped. The code is `None` when a signal ended it.
    Exited(Option<i32>),
}

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The process exited with the given code (`None` for a signal).
    Exited(Option<i32>),
    /// The timeout elapsed first.
    TimedOut,
}

struct Handle {
    child: Child,
    /// `Some` once the child has been reaped.
    exit: Option<Option<i32>>,
}

impl Handle {
    fn reap(&mut self, pid: u32) -> ProcessStatus {
        if let Some(code) = self.exit {
            return ProcessStatus::Exited(code);
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = pid, status = %status, "Scan process exited");
                self.exit = Some(status.code());
                ProcessStatus::Exited(status.code())
            }
            Ok(None) => ProcessStatus::Running,
            Err(e) => {
                warn!(pid = pid, error = %e, "Lost track of scan process");
                self.exit = Some(None);
                ProcessStatus::Exited(None)
            }
        }
    }
}

/// Owns one spawned scan process.
///
/// The handle is shared between the reader worker, which waits on it, and
/// the UI thread, which may terminate or kill it near exit. All access goes
/// through one mutex. The lock is never held across a sleep.
pub struct ProcessRunner {
    handle: Mutex<Handle>,
    pid: u32,
    program: String,
}

impl ProcessRunner {
    /// Spawn `command` with stdout and stderr merged into one pipe.
    ///
    /// Fails with [`Error::Launch`] when the program cannot be found or
    /// started.
    pub fn spawn(command: &ScanCommand) -> Result<(Self, PipeReader)> {
        command.ensure_runnable()?;

        let (reader, writer) = io::pipe().map_err(|e| launch_error(command, e))?;
        let stderr_writer = writer.try_clone().map_err(|e| launch_error(command, e))?;

        // `cmd` holds our copies of the write end; it must be dropped before
        // reading or end-of-stream never arrives.
        let child = {
            let mut cmd = Command::new(&command.program);
            cmd.args(&command.args)
                .stdin(Stdio::null())
                .stdout(writer)
                .stderr(stderr_writer);
            configure_platform(&mut cmd);
            cmd.spawn().map_err(|e| launch_error(command, e))?
        };

        let pid = child.id();
        debug!(pid = pid, program = %command.program, "Spawned scan process");

        Ok((
            Self {
                handle: Mutex::new(Handle { child, exit: None }),
                pid,
                program: command.program.clone(),
            },
            reader,
        ))
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Program name the process was started from.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Non-blocking liveness check. Reaps the process if it has exited.
    pub fn poll(&self) -> ProcessStatus {
        self.handle.lock().reap(self.pid)
    }

    /// Whether the process has been reaped.
    pub fn is_released(&self) -> bool {
        self.handle.lock().exit.is_some()
    }

    /// Ask the process to shut down.
    ///
    /// On unix the request goes to the whole process group, even after the
    /// leader has been reaped, so background children holding the output
    /// pipe are asked too. Elsewhere it is a no-op once the process is reaped.
    pub fn terminate(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        let status = handle.reap(self.pid);

        debug!(pid = self.pid, status = ?status, "Sending polite termination request");

        // Only called while the run owns this runner, so the group id is ours
        // until every member is gone, at which point killpg reports ESRCH.
        #[cfg(unix)]
        {
            signal_group(self.pid, nix::sys::signal::Signal::SIGTERM)
        }

        #[cfg(not(unix))]
        {
            if let ProcessStatus::Exited(_) = status {
                return Ok(());
            }
            handle.child.kill().map_err(|e| Error::Signal {
                pid: self.pid,
                reason: e.to_string(),
            })
        }
    }

    /// Force immediate termination.
    ///
    /// Never fails. On unix the group is killed even when the leader already
    /// exited; the leader itself is left alone once reaped.
    pub fn kill(&self) {
        let mut handle = self.handle.lock();

        #[cfg(unix)]
        if let Err(e) = signal_group(self.pid, nix::sys::signal::Signal::SIGKILL) {
            debug!(pid = self.pid, error = %e, "Group kill failed");
        }

        if handle.exit.is_some() {
            return;
        }

        warn!(pid = self.pid, "Force killing scan process");
        if let Err(e) = handle.child.kill() {
            debug!(pid = self.pid, error = %e, "Kill reported an error");
        }
    }

    /// Wait for the process to exit, up to `timeout` (`None` waits forever).
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let ProcessStatus::Exited(code) = self.poll() {
                return WaitOutcome::Exited(code);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return WaitOutcome::TimedOut;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Wait for the process to exit and return its code.
    pub fn wait(&self) -> Option<i32> {
        match self.wait_timeout(None) {
            WaitOutcome::Exited(code) => code,
            WaitOutcome::TimedOut => None,
        }
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        let handle = self.handle.get_mut();
        if handle.exit.is_none() {
            debug!(pid = self.pid, "Reaping scan process on drop");
            let _ = handle.child.kill();
            let _ = handle.child.wait();
        }
    }
}

/// Launcher that spawns real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl SystemLauncher {
    /// Create a new launcher.
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, command: &ScanCommand) -> Result<LaunchedProcess> {
        let (runner, reader) = ProcessRunner::spawn(command)?;
        Ok(LaunchedProcess {
            runner,
            output: Box::new(reader),
        })
    }
}

fn launch_error(command: &ScanCommand, source: io::Error) -> Error {
    Error::Launch {
        program: command.program.clone(),
        source,
    }
}

#[cfg(unix)]
fn configure_platform(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn configure_platform(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(any(unix, windows)))]
fn configure_platform(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid).map_err(|_| Error::Signal {
        pid,
        reason: "pid out of range".to_string(),
    })?;

    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(Error::Signal {
            pid,
            reason: errno.desc().to_string(),
        }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Read;

    fn sh(script: &str) -> ScanCommand {
        ScanCommand::new("sh", ["-c", script])
    }

    #[test]
    fn test_spawn_captures_stdout_and_stderr() {
        let (runner, mut reader) = ProcessRunner::spawn(&sh("echo out; echo err 1>&2")).unwrap();

        let mut output = String::new();
        reader.read_to_string(&mut output).unwrap();

        assert_eq!(runner.wait(), Some(0));
        assert!(output.contains("out"));
        assert!(output.contains("err"));
        assert!(runner.is_released());
    }

    #[test]
    fn test_spawn_missing_binary() {
        let result = ProcessRunner::spawn(&ScanCommand::new(
            "/nonexistent/scanrunner-test-binary",
            ["-v"],
        ));
        match result {
            Err(Error::Launch { program, .. }) => {
                assert_eq!(program, "/nonexistent/scanrunner-test-binary")
            }
            _ => panic!("expected a launch error"),
        }
    }

    #[test]
    fn test_spawn_empty_program() {
        assert!(matches!(
            ProcessRunner::spawn(&ScanCommand::new("", Vec::<String>::new())),
            Err(Error::EmptyCommand)
        ));
    }

    #[test]
    fn test_nonzero_exit_code() {
        let (runner, _reader) = ProcessRunner::spawn(&sh("exit 3")).unwrap();
        assert_eq!(
            runner.wait_timeout(Some(Duration::from_secs(5))),
            WaitOutcome::Exited(Some(3))
        );
        assert_eq!(runner.poll(), ProcessStatus::Exited(Some(3)));
    }

    #[test]
    fn test_terminate_stops_cooperative_process() {
        let (runner, _reader) = ProcessRunner::spawn(&sh("sleep 30")).unwrap();
        assert_eq!(runner.poll(), ProcessStatus::Running);

        runner.terminate().unwrap();
        let outcome = runner.wait_timeout(Some(Duration::from_secs(5)));
        assert_eq!(outcome, WaitOutcome::Exited(None));
    }

    #[test]
    fn test_kill_after_terminate_is_ignored() {
        let (runner, _reader) =
            ProcessRunner::spawn(&sh("trap '' TERM; while :; do sleep 1; done")).unwrap();

        runner.terminate().unwrap();
        assert_eq!(
            runner.wait_timeout(Some(Duration::from_millis(300))),
            WaitOutcome::TimedOut
        );

        runner.kill();
        assert!(matches!(
            runner.wait_timeout(Some(Duration::from_secs(5))),
            WaitOutcome::Exited(_)
        ));
    }

    #[test]
    fn test_kill_and_terminate_after_exit_are_noops() {
        let (runner, _reader) = ProcessRunner::spawn(&sh("true")).unwrap();
        assert_eq!(runner.wait(), Some(0));

        runner.kill();
        runner.kill();
        assert!(runner.terminate().is_ok());
        assert_eq!(runner.poll(), ProcessStatus::Exited(Some(0)));
    }

    #[test]
    fn test_kill_reaches_background_child_after_leader_exit() {
        let (runner, reader) = ProcessRunner::spawn(&sh("sleep 30 & echo started")).unwrap();
        let mut reader = io::BufReader::new(reader);

        let mut first = String::new();
        io::BufRead::read_line(&mut reader, &mut first).unwrap();
        assert_eq!(first.trim(), "started");
        assert_eq!(runner.wait(), Some(0));

        // The background sleep still holds the write end of the pipe.
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut rest = String::new();
            let _ = reader.read_to_string(&mut rest);
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        runner.kill();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(runner.poll(), ProcessStatus::Exited(Some(0)));
    }

    #[test]
    fn test_terminate_reaches_background_child_after_leader_exit() {
        let (runner, mut reader) = ProcessRunner::spawn(&sh("sleep 30 & echo started")).unwrap();
        assert_eq!(runner.wait(), Some(0));

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut output = String::new();
            let _ = reader.read_to_string(&mut output);
            let _ = tx.send(output);
        });

        runner.terminate().unwrap();
        let output = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(output.trim(), "started");
    }

    #[test]
    fn test_system_launcher() {
        let launched = SystemLauncher::new().launch(&sh("echo hello")).unwrap();
        let mut output = String::new();
        let mut reader = launched.output;
        reader.read_to_string(&mut output).unwrap();

        assert_eq!(output.trim(), "hello");
        assert_eq!(launched.runner.wait(), Some(0));
    }
}
