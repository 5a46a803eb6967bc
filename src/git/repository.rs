//! Repository context detected at activation
//!
//! Holds what the provider learned about the working copy and the tool:
//! root, binary, versions, branch, HEAD, remote and user identity.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{ErrorKind, Result};
use crate::parse::{CommitSummary, GitVersion, LfsVersion, parse_commit_summary};

use super::command;
use super::discovery::resolve_root;
use super::executor::{ToolInvocation, ToolRunner};

/// Everything known about the active working copy
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    pub root: PathBuf,
    pub binary: PathBuf,
    pub git_version: GitVersion,
    pub lfs_version: Option<LfsVersion>,
    /// Locking requested in config and supported by the installed LFS
    pub lfs_locking: bool,
    /// Identity compared against lock owners
    pub lfs_user: Option<String>,
    pub branch: Option<String>,
    pub head: Option<CommitSummary>,
    pub remote_url: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

/// Availability of the provider
#[derive(Debug, Clone)]
pub enum ContextState {
    Ready(RepositoryContext),
    Unavailable { kind: ErrorKind, reason: String },
}

impl ContextState {
    pub fn context(&self) -> Option<&RepositoryContext> {
        match self {
            Self::Ready(ctx) => Some(ctx),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Context shared between the worker (writer) and the façade (readers)
#[derive(Debug, Clone)]
pub struct SharedContext(Arc<RwLock<ContextState>>);

impl SharedContext {
    pub fn new(state: ContextState) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    pub fn get(&self) -> ContextState {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, state: ContextState) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Mutate the ready context in place; no-op while unavailable
    pub fn update(&self, f: impl FnOnce(&mut RepositoryContext)) {
        if let ContextState::Ready(ctx) = &mut *self.0.write().unwrap_or_else(PoisonError::into_inner) {
            f(ctx);
        }
    }
}

impl RepositoryContext {
    /// Probe the tool and the working copy rooted at `root`
    ///
    /// Only `git version` is mandatory; every other probe degrades to `None`.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub async fn detect(
        runner: &dyn ToolRunner,
        binary: PathBuf,
        root: PathBuf,
        config: &Config,
    ) -> Result<Self> {
        let timeout = config.operation_timeout();
        let run = |args: Vec<String>| ToolInvocation::new(root.clone(), args).with_timeout(timeout);

        let version = runner.execute(&run(command::version())).await?;
        let git_version = GitVersion::parse(&version.stdout)?;

        let lfs_version = match runner.execute(&run(command::lfs_version())).await {
            Ok(out) => LfsVersion::parse(&out.stdout).ok(),
            Err(e) => {
                debug!("git lfs not available: {}", e);
                None
            }
        };

        let lfs_locking = config.lfs_locking && lfs_version.is_some_and(|v| v.supports_locking());
        if config.lfs_locking && !lfs_locking {
            warn!("LFS locking requested but git-lfs >= 2.0.0 was not found");
        }

        let branch = probe(runner, &run(command::current_branch())).await;
        let head = probe(runner, &run(command::head_commit()))
            .await
            .and_then(|out| parse_commit_summary(&out).ok());
        let remote_url = probe(runner, &run(command::remote_url(&config.remote))).await;
        let user_name = probe(runner, &run(command::config_value("user.name"))).await;
        let user_email = probe(runner, &run(command::config_value("user.email"))).await;
        let lfs_user = config.lfs_user_name.clone().or_else(|| user_name.clone());

        info!(
            "git {} at {:?}, branch {}",
            git_version,
            binary,
            branch.as_deref().unwrap_or("(detached)")
        );

        Ok(Self {
            root,
            binary,
            git_version,
            lfs_version,
            lfs_locking,
            lfs_user,
            branch,
            head,
            remote_url,
            user_name,
            user_email,
        })
    }

    /// Refresh branch and HEAD after operations that move them
    pub async fn current_head(
        runner: &dyn ToolRunner,
        root: &std::path::Path,
        config: &Config,
    ) -> (Option<String>, Option<CommitSummary>) {
        let run = |args: Vec<String>| ToolInvocation::new(root, args).with_timeout(config.operation_timeout());
        let branch = probe(runner, &run(command::current_branch())).await;
        let head = probe(runner, &run(command::head_commit()))
            .await
            .and_then(|out| parse_commit_summary(&out).ok());
        (branch, head)
    }

    /// Multi-line summary for status displays
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Repository: {}", self.root.display()),
            format!(
                "Remote: {}",
                self.remote_url.as_deref().unwrap_or("(none)")
            ),
            format!(
                "User: {} <{}>",
                self.user_name.as_deref().unwrap_or("(unknown)"),
                self.user_email.as_deref().unwrap_or("")
            ),
            format!("Branch: {}", self.branch.as_deref().unwrap_or("(detached)")),
        ];
        match &self.head {
            Some(head) => lines.push(format!("Commit: {} {}", head.short_id(), head.summary)),
            None => lines.push("Commit: (none)".to_string()),
        }
        let lfs = match (&self.lfs_version, self.lfs_locking) {
            (Some(v), true) => format!("{v} (locking)"),
            (Some(v), false) => v.to_string(),
            (None, _) => "not installed".to_string(),
        };
        lines.push(format!("Git: {}, LFS: {}", self.git_version, lfs));
        lines.join("\n")
    }
}

/// Validate the config, locate the root and probe the tool
///
/// Never fails: problems turn into [`ContextState::Unavailable`].
pub async fn detect_state(runner: &dyn ToolRunner, binary: PathBuf, config: &Config) -> ContextState {
    let unavailable = |e: crate::error::Error| {
        warn!("git unavailable: {}", e);
        ContextState::Unavailable {
            kind: e.kind(),
            reason: e.user_message(),
        }
    };

    if let Err(e) = config.validate() {
        return unavailable(e);
    }
    let root = match resolve_root(config) {
        Ok(root) => root,
        Err(e) => return unavailable(e),
    };
    match RepositoryContext::detect(runner, binary, root, config).await {
        Ok(ctx) => ContextState::Ready(ctx),
        Err(e) => unavailable(e),
    }
}

/// Run an optional probe; failures and empty output both mean "unknown"
async fn probe(runner: &dyn ToolRunner, invocation: &ToolInvocation) -> Option<String> {
    runner
        .execute(invocation)
        .await
        .ok()
        .map(|out| out.stdout.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::ScriptedRunner;

    #[tokio::test]
    async fn test_detect_with_lfs_locking() {
        let runner = ScriptedRunner::new()
            .reply(&["version"], "git version 2.43.0\n")
            .reply(&["lfs", "version"], "git-lfs/3.4.1 (GitHub; linux amd64; go 1.21)\n")
            .reply(&["symbolic-ref"], "main\n")
            .reply(&["log", "-1"], "97a4e7626681895e073aaefd68b8ac087db81b0b Initial\n")
            .reply(&["remote", "get-url"], "git@example.com:game.git\n")
            .reply(&["config", "user.name"], "Alice\n")
            .reply(&["config", "user.email"], "alice@example.com\n");
        let config = Config {
            lfs_locking: true,
            ..Config::default()
        };

        let ctx = RepositoryContext::detect(&runner, "git".into(), std::env::temp_dir(), &config)
            .await
            .unwrap();
        assert!(ctx.lfs_locking);
        assert_eq!(ctx.lfs_user.as_deref(), Some("Alice"));
        assert_eq!(ctx.branch.as_deref(), Some("main"));
        assert_eq!(ctx.head.as_ref().map(|h| h.short_id()), Some("97a4e762"));
        assert!(ctx.summary().contains("Branch: main"));
    }

    #[tokio::test]
    async fn test_detect_degrades_optional_probes() {
        let runner = ScriptedRunner::new()
            .reply(&["version"], "git version 2.30.1\n")
            .fail(&["lfs"], 1, "git: 'lfs' is not a git command.")
            .fail(&["symbolic-ref"], 1, "")
            .fail(&["log"], 128, "fatal: your current branch does not have any commits yet");
        let config = Config {
            lfs_locking: true,
            lfs_user_name: Some("lock-user".to_string()),
            ..Config::default()
        };

        let ctx = RepositoryContext::detect(&runner, "git".into(), std::env::temp_dir(), &config)
            .await
            .unwrap();
        assert!(!ctx.lfs_locking);
        assert!(ctx.lfs_version.is_none());
        assert!(ctx.branch.is_none());
        assert!(ctx.head.is_none());
        assert_eq!(ctx.lfs_user.as_deref(), Some("lock-user"));
    }

    #[tokio::test]
    async fn test_detect_requires_version() {
        let runner = ScriptedRunner::new().not_found(&["version"]);
        let err = RepositoryContext::detect(&runner, "git".into(), std::env::temp_dir(), &Config::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolNotFound);
    }
}
