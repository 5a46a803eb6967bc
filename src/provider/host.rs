//! Translation between host-side paths and status vocabulary

use std::path::{Component, Path};

use serde::Serialize;

use crate::cache::{Classification, FileState, WorkingCopyStatus};

/// File state expressed in the host's vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostStatus {
    pub display_name: String,
    pub tooltip: String,
    /// Icon name; `None` for files that need no decoration
    pub icon: Option<&'static str>,
    pub can_check_in: bool,
    pub can_check_out: bool,
    pub can_edit: bool,
    pub is_source_controlled: bool,
    pub is_added: bool,
    pub is_deleted: bool,
    pub is_modified: bool,
    pub is_conflicted: bool,
    pub is_ignored: bool,
    pub is_unknown: bool,
    /// Lock owner when another user holds the file
    pub checked_out_other: Option<String>,
    /// False while the cached state is stale
    pub is_current: bool,
    pub is_binary: bool,
    pub revision: Option<String>,
}

impl HostStatus {
    /// Status for a path the cache has never seen
    pub fn unknown() -> Self {
        Self {
            display_name: "Unknown".to_string(),
            tooltip: "Unknown source control state".to_string(),
            icon: None,
            can_check_in: false,
            can_check_out: false,
            can_edit: false,
            is_source_controlled: false,
            is_added: false,
            is_deleted: false,
            is_modified: false,
            is_conflicted: false,
            is_ignored: false,
            is_unknown: true,
            checked_out_other: None,
            is_current: false,
            is_binary: false,
            revision: None,
        }
    }

    pub fn from_state(state: &FileState) -> Self {
        use WorkingCopyStatus::*;

        let owner = state.lock_owner.as_deref().unwrap_or("another user");
        let (display_name, tooltip) = match state.status {
            Unmodified => ("Unmodified".to_string(), "There are no modifications".to_string()),
            Modified => ("Modified".to_string(), "Item has been modified".to_string()),
            Added => ("Added".to_string(), "Item is scheduled for addition".to_string()),
            Deleted => ("Deleted".to_string(), "Item is scheduled for deletion".to_string()),
            Renamed => (
                "Renamed".to_string(),
                match &state.renamed_from {
                    Some(from) => format!("Item has been renamed from {from}"),
                    None => "Item has been renamed".to_string(),
                },
            ),
            Conflicted => (
                "Contents Conflict".to_string(),
                "The contents of the item conflict with updates received from the repository".to_string(),
            ),
            Untracked => (
                "Not Under Source Control".to_string(),
                "Item is not under version control".to_string(),
            ),
            Ignored => ("Ignored".to_string(), "Item is being ignored".to_string()),
            LockHeldBySelf => ("Checked Out".to_string(), "Item is locked by you".to_string()),
            LockHeldByOther => (
                format!("Checked Out by {owner}"),
                format!("Item is locked by {owner}"),
            ),
        };

        let icon = match state.status {
            Added | Modified | Renamed | LockHeldBySelf => Some("git.checked_out"),
            Deleted => Some("git.marked_for_delete"),
            Conflicted => Some("git.not_at_head"),
            LockHeldByOther => Some("git.checked_out_by_other"),
            Untracked => Some("git.not_in_depot"),
            Unmodified | Ignored => None,
        };

        let changed = matches!(state.status, Modified | Added | Deleted | Renamed);
        let self_locked = state.status == LockHeldBySelf;

        Self {
            display_name,
            tooltip,
            icon,
            can_check_in: changed || self_locked,
            can_check_out: matches!(state.status, Unmodified | Modified) && state.lock_owner.is_none(),
            can_edit: !matches!(state.status, LockHeldByOther | Ignored),
            is_source_controlled: !matches!(state.status, Untracked | Ignored),
            is_added: state.status == Added,
            is_deleted: state.status == Deleted,
            is_modified: matches!(state.status, Modified | Renamed | Conflicted) || self_locked,
            is_conflicted: state.status == Conflicted,
            is_ignored: state.status == Ignored,
            is_unknown: false,
            checked_out_other: (state.status == LockHeldByOther)
                .then(|| state.lock_owner.clone())
                .flatten(),
            is_current: !state.stale,
            is_binary: state.classification == Classification::Binary,
            revision: state.revision.clone(),
        }
    }
}

impl From<Option<&FileState>> for HostStatus {
    fn from(state: Option<&FileState>) -> Self {
        state.map_or_else(Self::unknown, Self::from_state)
    }
}

/// Convert a host path (absolute, or relative to the root) to the
/// repository-relative, forward-slash form used as cache key
///
/// `..` components are resolved lexically. Returns `None` for paths outside
/// `root` and for the root itself.
pub fn to_repo_relative(root: &Path, path: &str) -> Option<String> {
    let normalized = path.replace('\\', "/");
    let candidate = Path::new(&normalized);

    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).ok()?
    } else {
        candidate
    };

    let mut parts: Vec<String> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            // Climbing above the root leaves the working copy
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
