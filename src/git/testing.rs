//! Scripted [`ToolRunner`] for exercising the dispatcher without a real git

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, RunnerError};

use super::executor::{ToolInvocation, ToolOutput, ToolRunner};

#[derive(Debug, Clone)]
enum Reply {
    Output(String),
    Fail { code: i32, stderr: String },
    NotFound,
    Timeout,
    TooLarge,
    Delayed(Duration, String),
}

#[derive(Debug)]
struct Rule {
    prefix: Vec<String>,
    reply: Reply,
}

/// Answers invocations by argument prefix (first matching rule wins) and
/// records every call; unmatched invocations succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<ToolInvocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(mut self, prefix: &[&str], reply: Reply) -> Self {
        self.rules.push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            reply,
        });
        self
    }

    pub fn reply(self, prefix: &[&str], stdout: &str) -> Self {
        self.rule(prefix, Reply::Output(stdout.to_string()))
    }

    pub fn fail(self, prefix: &[&str], code: i32, stderr: &str) -> Self {
        self.rule(
            prefix,
            Reply::Fail {
                code,
                stderr: stderr.to_string(),
            },
        )
    }

    pub fn not_found(self, prefix: &[&str]) -> Self {
        self.rule(prefix, Reply::NotFound)
    }

    pub fn timeout(self, prefix: &[&str]) -> Self {
        self.rule(prefix, Reply::Timeout)
    }

    pub fn too_large(self, prefix: &[&str]) -> Self {
        self.rule(prefix, Reply::TooLarge)
    }

    pub fn delayed(self, prefix: &[&str], delay: Duration, stdout: &str) -> Self {
        self.rule(prefix, Reply::Delayed(delay, stdout.to_string()))
    }

    /// Every invocation seen so far, in order
    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Invocations rendered as space-joined argument strings
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.args.join(" ")).collect()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());

        let reply = self
            .rules
            .iter()
            .find(|rule| invocation.args.starts_with(&rule.prefix))
            .map(|rule| rule.reply.clone())
            .unwrap_or(Reply::Output(String::new()));

        let command = invocation.command_line();
        let output = |stdout: String| ToolOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        };

        match reply {
            Reply::Output(stdout) => Ok(output(stdout)),
            Reply::Delayed(delay, stdout) => {
                tokio::time::sleep(delay).await;
                Ok(output(stdout))
            }
            Reply::Fail { code, stderr } => Err(RunnerError::NonZeroExit {
                command,
                code,
                stderr,
            }
            .into()),
            Reply::NotFound => Err(RunnerError::ToolNotFound("git".into()).into()),
            Reply::Timeout => Err(RunnerError::Timeout {
                command,
                timeout: invocation.timeout,
            }
            .into()),
            Reply::TooLarge => Err(RunnerError::OutputTooLarge { command, cap: 0 }.into()),
        }
    }
}
