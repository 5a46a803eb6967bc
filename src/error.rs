//! Error types for gitsc
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.
//! Every layer has its own enum; [`Error::kind`] folds them into the flat [`ErrorKind`]
//! taxonomy that operation results and the host-facing API report.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::OperationId;

/// Top-level error type for gitsc
#[derive(Error, Debug)]
pub enum Error {
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Subprocess execution errors
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Git executable not found: {}", .0.display())]
    ToolNotFound(PathBuf),

    #[error("Failed to run `{command}`: {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` exited with code {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("`{command}` produced more than {cap} bytes of output")]
    OutputTooLarge { command: String, cap: usize },

    #[error("Working directory does not exist: {}", .0.display())]
    InvalidWorkingDirectory(PathBuf),
}

impl RunnerError {
    /// Captured standard error, when the tool ran far enough to produce one
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::NonZeroExit { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }
}

/// Output parsing errors
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unparsable {what} output: {malformed} of {total} lines malformed (first: {first:?})")]
    Unparsable {
        what: &'static str,
        malformed: usize,
        total: usize,
        first: String,
    },

    #[error("Invalid {what} output: {reason}")]
    Invalid { what: &'static str, reason: String },
}

/// State cache invariant violations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Refresh batch tagged with epoch {batch} but the cache is at epoch {current}")]
    EpochAhead { batch: u64, current: u64 },

    #[error("Cache inconsistent: {0}")]
    Inconsistent(String),
}

/// Operation queue and worker errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Operation {0} was cancelled before it started")]
    Cancelled(OperationId),

    #[error("Operation queue is full ({0} pending operations)")]
    QueueFull(usize),

    #[error("Operation worker has stopped")]
    WorkerStopped,

    #[error("Git is not available: {0}")]
    Unavailable(String),

    #[error("Git LFS file locking is not enabled")]
    LockingDisabled,

    #[error("Invalid {0}")]
    InvalidArgument(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Required setting '{0}' is not configured")]
    NotConfigured(&'static str),

    #[error("Failed to create config directory: {0}")]
    DirectoryCreationFailed(PathBuf),
}

/// Flat failure taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ToolNotFound,
    NotConfigured,
    ProcessSpawnFailed,
    TimedOut,
    NonZeroExit,
    OutputTooLarge,
    UnparsableOutput,
    OperationCancelled,
    CacheInconsistent,
    QueueFull,
}

impl ErrorKind {
    /// Generic, human-readable description of the failure kind
    pub fn description(&self) -> &'static str {
        match self {
            Self::ToolNotFound => "Git could not be found or is not responding",
            Self::NotConfigured => "Source control is not configured",
            Self::ProcessSpawnFailed => "Git could not be started",
            Self::TimedOut => "Git took too long to respond",
            Self::NonZeroExit => "Git reported an error",
            Self::OutputTooLarge => "Git produced more output than allowed",
            Self::UnparsableOutput => "Git output could not be understood",
            Self::OperationCancelled => "The operation was cancelled",
            Self::CacheInconsistent => "Internal state cache error",
            Self::QueueFull => "Too many source control operations are pending",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ToolNotFound => "tool_not_found",
            Self::NotConfigured => "not_configured",
            Self::ProcessSpawnFailed => "process_spawn_failed",
            Self::TimedOut => "timed_out",
            Self::NonZeroExit => "non_zero_exit",
            Self::OutputTooLarge => "output_too_large",
            Self::UnparsableOutput => "unparsable_output",
            Self::OperationCancelled => "operation_cancelled",
            Self::CacheInconsistent => "cache_inconsistent",
            Self::QueueFull => "queue_full",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classify this error into the flat taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Runner(e) => match e {
                RunnerError::ToolNotFound(_) => ErrorKind::ToolNotFound,
                RunnerError::SpawnFailed { .. } | RunnerError::InvalidWorkingDirectory(_) => {
                    ErrorKind::ProcessSpawnFailed
                }
                RunnerError::Timeout { .. } => ErrorKind::TimedOut,
                RunnerError::NonZeroExit { .. } => ErrorKind::NonZeroExit,
                RunnerError::OutputTooLarge { .. } => ErrorKind::OutputTooLarge,
            },
            Error::Parse(_) => ErrorKind::UnparsableOutput,
            Error::Cache(_) => ErrorKind::CacheInconsistent,
            Error::Dispatch(e) => match e {
                DispatchError::Cancelled(_) | DispatchError::WorkerStopped => {
                    ErrorKind::OperationCancelled
                }
                DispatchError::QueueFull(_) => ErrorKind::QueueFull,
                DispatchError::Unavailable(_) => ErrorKind::ToolNotFound,
                DispatchError::LockingDisabled => ErrorKind::NotConfigured,
                // git rejects such names itself with a failing exit
                DispatchError::InvalidArgument(_) => ErrorKind::NonZeroExit,
            },
            Error::Config(_) => ErrorKind::NotConfigured,
            Error::Io(_) => ErrorKind::ProcessSpawnFailed,
        }
    }

    /// Message for the user: captured stderr when there is some, otherwise the
    /// generic description of the kind with the specific detail appended.
    pub fn user_message(&self) -> String {
        if let Error::Runner(runner) = self {
            if let Some(stderr) = runner.stderr().map(str::trim).filter(|s| !s.is_empty()) {
                return stderr.to_string();
            }
        }
        format!("{} ({})", self.kind().description(), self)
    }
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RunnerError::ToolNotFound(PathBuf::from("/opt/git/bin/git"));
        assert!(err.to_string().contains("/opt/git/bin/git"));

        let err = ConfigError::NotConfigured("repository_root");
        assert!(err.to_string().contains("repository_root"));

        let err = DispatchError::QueueFull(256);
        assert!(err.to_string().contains("256"));
    }

    #[test]
    fn test_error_kind_mapping() {
        let err: Error = RunnerError::Timeout {
            command: "git status".to_string(),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::TimedOut);

        let err: Error = ConfigError::NotConfigured("binary_path").into();
        assert_eq!(err.kind(), ErrorKind::NotConfigured);

        let err: Error = DispatchError::Cancelled(OperationId::new()).into();
        assert_eq!(err.kind(), ErrorKind::OperationCancelled);

        let err: Error = CacheError::EpochAhead { batch: 3, current: 2 }.into();
        assert_eq!(err.kind(), ErrorKind::CacheInconsistent);
    }

    #[test]
    fn test_user_message_prefers_stderr() {
        let err: Error = RunnerError::NonZeroExit {
            command: "git commit".to_string(),
            code: 1,
            stderr: "  nothing to commit, working tree clean\n".to_string(),
        }
        .into();
        assert_eq!(err.user_message(), "nothing to commit, working tree clean");

        let err: Error = RunnerError::NonZeroExit {
            command: "git push".to_string(),
            code: 128,
            stderr: String::new(),
        }
        .into();
        assert!(err.user_message().starts_with("Git reported an error"));
    }
}
