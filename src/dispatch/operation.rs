//! Operation requests, results and handles

use std::fmt;
use std::future::IntoFuture;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::cache::RefreshScope;
use crate::error::{DispatchError, Error, ErrorKind};
use crate::parse::{BranchInfo, CommitSummary, Revision};

/// Unique identifier for a submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Show short form for display
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A unit of work for the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    Refresh(RefreshScope),
    Add(Vec<String>),
    Delete(Vec<String>),
    Revert(Vec<String>),
    Commit { paths: Vec<String>, message: String },
    Sync,
    Push,
    Lock(Vec<String>),
    Unlock(Vec<String>),
    Resolve(Vec<String>),
    SwitchBranch { branch: String, create: bool },
    ListBranches,
    History { path: String },
    Reconnect,
}

/// Kind of an operation, without its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Refresh,
    Add,
    Delete,
    Revert,
    Commit,
    Sync,
    Push,
    Lock,
    Unlock,
    Resolve,
    SwitchBranch,
    ListBranches,
    History,
    Reconnect,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Revert => "revert",
            Self::Commit => "commit",
            Self::Sync => "sync",
            Self::Push => "push",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Resolve => "resolve",
            Self::SwitchBranch => "switch_branch",
            Self::ListBranches => "list_branches",
            Self::History => "history",
            Self::Reconnect => "reconnect",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OperationRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Refresh(_) => OperationKind::Refresh,
            Self::Add(_) => OperationKind::Add,
            Self::Delete(_) => OperationKind::Delete,
            Self::Revert(_) => OperationKind::Revert,
            Self::Commit { .. } => OperationKind::Commit,
            Self::Sync => OperationKind::Sync,
            Self::Push => OperationKind::Push,
            Self::Lock(_) => OperationKind::Lock,
            Self::Unlock(_) => OperationKind::Unlock,
            Self::Resolve(_) => OperationKind::Resolve,
            Self::SwitchBranch { .. } => OperationKind::SwitchBranch,
            Self::ListBranches => OperationKind::ListBranches,
            Self::History { .. } => OperationKind::History,
            Self::Reconnect => OperationKind::Reconnect,
        }
    }

    /// Paths whose cached state this operation may change
    pub fn paths(&self) -> &[String] {
        match self {
            Self::Refresh(RefreshScope::Paths(paths))
            | Self::Add(paths)
            | Self::Delete(paths)
            | Self::Revert(paths)
            | Self::Commit { paths, .. }
            | Self::Lock(paths)
            | Self::Unlock(paths)
            | Self::Resolve(paths) => paths,
            _ => &[],
        }
    }

    /// Rewrite every path the request carries
    pub fn map_paths(self, f: impl Fn(String) -> String) -> Self {
        let map = |paths: Vec<String>| paths.into_iter().map(&f).collect::<Vec<_>>();
        match self {
            Self::Refresh(RefreshScope::Paths(paths)) => Self::Refresh(RefreshScope::paths(map(paths))),
            Self::Add(paths) => Self::Add(map(paths)),
            Self::Delete(paths) => Self::Delete(map(paths)),
            Self::Revert(paths) => Self::Revert(map(paths)),
            Self::Commit { paths, message } => Self::Commit {
                paths: map(paths),
                message,
            },
            Self::Lock(paths) => Self::Lock(map(paths)),
            Self::Unlock(paths) => Self::Unlock(map(paths)),
            Self::Resolve(paths) => Self::Resolve(map(paths)),
            Self::History { path } => Self::History { path: f(path) },
            other => other,
        }
    }

    /// Operations that may touch any path in the working copy
    pub fn affects_everything(&self) -> bool {
        matches!(
            self,
            Self::Refresh(RefreshScope::Full) | Self::Sync | Self::SwitchBranch { .. } | Self::Reconnect
        )
    }
}

/// Extra data returned by some operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum OperationPayload {
    #[default]
    None,
    Branches(Vec<BranchInfo>),
    History(Vec<Revision>),
    Commit(CommitSummary),
}

/// Successful completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    pub id: OperationId,
    pub kind: OperationKind,
    /// Informational messages (tool output, advisories)
    pub info: Vec<String>,
    /// Paths whose cached state changed as a result
    pub changed: Vec<String>,
    pub payload: OperationPayload,
}

impl OperationReport {
    pub fn new(id: OperationId, kind: OperationKind) -> Self {
        Self {
            id,
            kind,
            info: Vec::new(),
            changed: Vec::new(),
            payload: OperationPayload::None,
        }
    }
}

/// Failed completion
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct OperationFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Failure delivered to the caller of an operation cancelled before it ran
    pub fn cancelled(id: OperationId) -> Self {
        Self::from(Error::from(DispatchError::Cancelled(id)))
    }
}

impl From<&Error> for OperationFailure {
    fn from(err: &Error) -> Self {
        Self::new(err.kind(), err.user_message())
    }
}

impl From<Error> for OperationFailure {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

pub type OperationOutcome = std::result::Result<OperationReport, OperationFailure>;

/// Lifecycle of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Caller's side of a submitted operation
///
/// Await it (or call [`wait`](Self::wait)) for the outcome.
#[derive(Debug)]
pub struct OperationHandle {
    id: OperationId,
    kind: OperationKind,
    receiver: oneshot::Receiver<OperationOutcome>,
}

impl OperationHandle {
    pub(crate) fn new(
        id: OperationId,
        kind: OperationKind,
        receiver: oneshot::Receiver<OperationOutcome>,
    ) -> Self {
        Self { id, kind, receiver }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Wait for completion; a vanished worker counts as cancellation
    pub async fn wait(self) -> OperationOutcome {
        let id = self.id;
        self.receiver
            .await
            .unwrap_or_else(|_| Err(OperationFailure::cancelled(id)))
    }

    /// Poll without waiting; `None` while the operation is still pending
    pub fn try_result(&mut self) -> Option<OperationOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(OperationFailure::cancelled(self.id))),
        }
    }
}

impl IntoFuture for OperationHandle {
    type Output = OperationOutcome;
    type IntoFuture = BoxFuture<'static, OperationOutcome>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_id_display() {
        let id = OperationId::new();
        assert_eq!(id.to_string().len(), 8);
        assert_ne!(id, OperationId::new());
    }

    #[test]
    fn test_request_paths_and_kind() {
        let req = OperationRequest::Commit {
            paths: vec!["src/a.cpp".to_string()],
            message: "msg".to_string(),
        };
        assert_eq!(req.kind(), OperationKind::Commit);
        assert_eq!(req.paths(), ["src/a.cpp".to_string()]);
        assert!(!req.affects_everything());
        assert!(OperationRequest::Sync.affects_everything());
        assert!(OperationRequest::Sync.paths().is_empty());
    }

    #[tokio::test]
    async fn test_handle_resolves() {
        let (tx, rx) = oneshot::channel();
        let id = OperationId::new();
        let handle = OperationHandle::new(id, OperationKind::Push, rx);
        tx.send(Ok(OperationReport::new(id, OperationKind::Push))).unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.id, id);
    }

    #[tokio::test]
    async fn test_dropped_sender_is_cancellation() {
        let (tx, rx) = oneshot::channel::<OperationOutcome>();
        let mut handle = OperationHandle::new(OperationId::new(), OperationKind::Sync, rx);
        assert!(handle.try_result().is_none());
        drop(tx);
        let failure = handle.wait().await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::OperationCancelled);
    }
}
