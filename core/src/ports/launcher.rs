//! Process launcher port (interface).

use std::io::Read;

use crate::adapters::process::ProcessRunner;
use crate::domain::ScanCommand;
use crate::error::Result;

/// A freshly spawned process and the readable end of its output pipe.
pub struct LaunchedProcess {
    /// Handle used to poll, signal and reap the process.
    pub runner: ProcessRunner,
    /// Combined standard output and standard error.
    pub output: Box<dyn Read + Send>,
}

/// Port for spawning the external scan program.
///
/// Implementations fail with [`Error::Launch`](crate::error::Error::Launch)
/// when the program is missing or cannot be started.
pub trait ProcessLauncher {
    /// Spawn `command` with its output captured.
    fn launch(&self, command: &ScanCommand) -> Result<LaunchedProcess>;
}
