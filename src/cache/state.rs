//! File state model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Working-copy status of a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingCopyStatus {
    Unmodified,
    Modified,
    Added,
    Deleted,
    Renamed,
    Conflicted,
    Untracked,
    Ignored,
    LockHeldBySelf,
    LockHeldByOther,
}

impl WorkingCopyStatus {
    /// Does this status belong in the "changed" view
    pub fn is_changed(&self) -> bool {
        matches!(
            self,
            Self::Modified
                | Self::Added
                | Self::Deleted
                | Self::Renamed
                | Self::Conflicted
                | Self::Untracked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmodified => "unmodified",
            Self::Modified => "modified",
            Self::Added => "added",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Conflicted => "conflicted",
            Self::Untracked => "untracked",
            Self::Ignored => "ignored",
            Self::LockHeldBySelf => "locked",
            Self::LockHeldByOther => "locked by other",
        }
    }
}

impl fmt::Display for WorkingCopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Binary/text classification from git attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Binary,
    Text,
    #[default]
    Unknown,
}

/// Cached state of one repository-relative path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileState {
    /// Repository-relative path, forward slashes
    pub path: String,
    pub status: WorkingCopyStatus,
    /// Staged blob id when known
    pub revision: Option<String>,
    pub lock_owner: Option<String>,
    pub classification: Classification,
    pub renamed_from: Option<String>,
    /// Sequence number of the refresh batch that produced this record
    pub sequence: u64,
    /// Cache epoch the record was produced in
    pub epoch: u64,
    pub stale: bool,
    pub refreshed_at: DateTime<Utc>,
}

impl FileState {
    pub fn new(path: impl Into<String>, status: WorkingCopyStatus) -> Self {
        Self {
            path: path.into(),
            status,
            revision: None,
            lock_owner: None,
            classification: Classification::Unknown,
            renamed_from: None,
            sequence: 0,
            epoch: 0,
            stale: false,
            refreshed_at: Utc::now(),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Attach an LFS lock; only a clean file turns into a lock status
    pub fn with_lock(mut self, owner: impl Into<String>, held_by_self: bool) -> Self {
        self.lock_owner = Some(owner.into());
        if self.status == WorkingCopyStatus::Unmodified {
            self.status = if held_by_self {
                WorkingCopyStatus::LockHeldBySelf
            } else {
                WorkingCopyStatus::LockHeldByOther
            };
        }
        self
    }

    /// Compare what a caller can observe, ignoring bookkeeping
    pub fn same_state(&self, other: &FileState) -> bool {
        self.path == other.path
            && self.status == other.status
            && self.revision == other.revision
            && self.lock_owner == other.lock_owner
            && self.classification == other.classification
            && self.renamed_from == other.renamed_from
            && self.stale == other.stale
    }

    pub fn is_locked(&self) -> bool {
        self.lock_owner.is_some()
    }
}
