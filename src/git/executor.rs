//! Async git command executor with bounded output capture
//!
//! Provides out-of-process git execution with:
//! - Mandatory per-invocation timeout
//! - Bounded stdout (exceeding the cap kills the child)
//! - Truncated stderr
//! - Optional stdin payload

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::config::DEFAULT_OUTPUT_CAP_BYTES;
use crate::error::{Result, RunnerError};

/// Default invocation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One request to run the external tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub working_dir: PathBuf,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(working_dir: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            args,
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Feed this payload to the child's standard input
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable command line for logs and error messages
    pub fn command_line(&self) -> String {
        format!("git {}", self.args.join(" "))
    }
}

/// Captured result of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Anything able to run git on behalf of the dispatcher
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run one subprocess; a non-zero exit is reported as `NonZeroExit`
    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

/// Production runner spawning the git binary
#[derive(Debug, Clone)]
pub struct GitExecutor {
    binary: PathBuf,
    output_cap: usize,
}

enum Collected {
    Finished { status: ExitStatus, stdout: Vec<u8> },
    Overflow,
}

impl GitExecutor {
    /// Create an executor for the given binary with the default output cap
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            output_cap: DEFAULT_OUTPUT_CAP_BYTES,
        }
    }

    /// Set the maximum number of stdout bytes accepted
    pub fn with_output_cap(mut self, output_cap: usize) -> Self {
        self.output_cap = output_cap;
        self
    }

    async fn collect(child: &mut Child, stdout: ChildStdout, cap: usize) -> std::io::Result<Collected> {
        let mut buf = Vec::new();
        stdout.take(cap as u64 + 1).read_to_end(&mut buf).await?;
        if buf.len() > cap {
            return Ok(Collected::Overflow);
        }
        let status = child.wait().await?;
        Ok(Collected::Finished { status, stdout: buf })
    }
}

/// Read at most `cap` bytes, then drain the rest so the child never blocks on a full pipe
async fn read_truncated<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = (&mut reader).take(cap as u64).read_to_end(&mut buf).await;
    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    buf
}

#[async_trait]
impl ToolRunner for GitExecutor {
    #[instrument(skip(self, invocation), fields(cmd = %invocation.command_line(), cwd = %invocation.working_dir.display()))]
    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        let command = invocation.command_line();

        if !invocation.working_dir.is_dir() {
            return Err(RunnerError::InvalidWorkingDirectory(invocation.working_dir.clone()).into());
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_MESSAGES", "C")
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::ToolNotFound(self.binary.clone())
            } else {
                RunnerError::SpawnFailed {
                    command: command.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        if let (Some(payload), Some(mut pipe)) = (invocation.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(payload.as_bytes()).await {
                    debug!("stdin closed early: {}", e);
                }
            });
        }

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(RunnerError::SpawnFailed {
                command,
                reason: "output pipes were not captured".to_string(),
            }
            .into());
        };
        let stderr_task = tokio::spawn(read_truncated(stderr, self.output_cap));

        let collected = timeout(invocation.timeout, Self::collect(&mut child, stdout, self.output_cap)).await;

        match collected {
            Err(_) => {
                warn!("git timed out after {:?}: {}", invocation.timeout, command);
                let _ = child.start_kill();
                stderr_task.abort();
                Err(RunnerError::Timeout {
                    command,
                    timeout: invocation.timeout,
                }
                .into())
            }
            Ok(Err(e)) => {
                warn!("git i/o failed: {}", e);
                let _ = child.start_kill();
                stderr_task.abort();
                Err(RunnerError::SpawnFailed {
                    command,
                    reason: e.to_string(),
                }
                .into())
            }
            Ok(Ok(Collected::Overflow)) => {
                warn!("git output exceeded {} bytes: {}", self.output_cap, command);
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                Err(RunnerError::OutputTooLarge {
                    command,
                    cap: self.output_cap,
                }
                .into())
            }
            Ok(Ok(Collected::Finished { status, stdout })) => {
                let stderr = stderr_task.await.unwrap_or_default();
                let output = ToolOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                };

                if status.success() {
                    debug!(bytes = output.stdout.len(), "git finished");
                    Ok(output)
                } else {
                    warn!("git exited with {}: {}", output.exit_code, output.stderr.trim());
                    Err(RunnerError::NonZeroExit {
                        command,
                        code: output.exit_code,
                        stderr: output.stderr,
                    }
                    .into())
                }
            }
        }
    }
}
