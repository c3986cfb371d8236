//! Error types for the scanrunner-core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for scanrunner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while validating, launching, and supervising a scan.
#[derive(Error, Debug)]
pub enum Error {
    /// One or more targets failed validation.
    #[error("Invalid targets found: {}", invalid.join(", "))]
    Validation { invalid: Vec<String> },

    /// Neither a target list nor a target file was given.
    #[error("No valid targets specified")]
    NoTargets,

    /// The target file named in the request does not exist.
    #[error("Target file not found: {}", .0.display())]
    TargetFileNotFound(PathBuf),

    /// The command has no program to run.
    #[error("No command specified")]
    EmptyCommand,

    /// The external program could not be started.
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external program exited with a non-zero code.
    #[error("Scan failed with return code {code}")]
    Runtime { code: i32 },

    /// Reading the program's output failed mid-run.
    #[error("Error during scan: {0}")]
    Stream(String),

    /// A signal could not be delivered to the scan process.
    #[error("Failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    /// A scan is already running on this controller.
    #[error("A scan is already running")]
    AlreadyRunning,

    /// There is no session to act on.
    #[error("No scan has been started")]
    NoActiveScan,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_target() {
        let err = Error::Validation {
            invalid: vec!["bad host!".to_string(), "also bad?".to_string()],
        };
        assert_eq!(err.to_string(), "Invalid targets found: bad host!, also bad?");
    }

    #[test]
    fn test_launch_error_display() {
        let err = Error::Launch {
            program: "nmap".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().starts_with("Failed to launch nmap"));

        let err = Error::Runtime { code: 2 };
        assert_eq!(err.to_string(), "Scan failed with return code 2");
    }
}
