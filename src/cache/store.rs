//! Path-keyed state cache
//!
//! Readers take a shared lock and get copies; the dispatcher's worker is the
//! only writer and applies each refresh as one batch under the write lock,
//! so a half-applied refresh is never observable.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::debug;

use crate::error::{CacheError, Result};

use super::{FileState, WorkingCopyStatus};

/// Which paths a refresh covers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefreshScope {
    /// The whole working copy
    Full,
    /// An explicit, sorted and deduplicated path set
    Paths(Vec<String>),
}

impl RefreshScope {
    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        paths.sort();
        paths.dedup();
        Self::Paths(paths)
    }

    pub fn covers(&self, path: &str) -> bool {
        match self {
            Self::Full => true,
            Self::Paths(paths) => paths.binary_search_by(|p| p.as_str().cmp(path)).is_ok(),
        }
    }
}

/// Result of applying one refresh batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshDelta {
    pub sequence: u64,
    /// Paths whose observable state changed
    pub changed: Vec<String>,
}

#[derive(Debug, Default)]
struct CacheInner {
    epoch: u64,
    sequence: u64,
    entries: HashMap<String, FileState>,
}

impl CacheInner {
    fn served(&self, state: &FileState) -> FileState {
        let mut state = state.clone();
        if state.epoch < self.epoch {
            state.stale = true;
        }
        state
    }
}

/// In-memory map from repository-relative path to [`FileState`]
#[derive(Debug, Default)]
pub struct StateCache {
    inner: RwLock<CacheInner>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer never leaves a half-applied batch behind, so a
    // poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Look up one path; `None` means the path was never seen
    pub fn get(&self, path: &str) -> Option<FileState> {
        let inner = self.read();
        inner.entries.get(path).map(|s| inner.served(s))
    }

    /// Look up many paths under one lock; unknown paths are omitted
    pub fn get_batch(&self, paths: &[String]) -> HashMap<String, FileState> {
        let inner = self.read();
        paths
            .iter()
            .filter_map(|p| inner.entries.get(p).map(|s| (p.clone(), inner.served(s))))
            .collect()
    }

    /// Every path currently reported as changed, sorted by path
    pub fn changed(&self) -> Vec<FileState> {
        let inner = self.read();
        let mut changed: Vec<FileState> = inner
            .entries
            .values()
            .filter(|s| s.status.is_changed())
            .map(|s| inner.served(s))
            .collect();
        changed.sort_by(|a, b| a.path.cmp(&b.path));
        changed
    }

    /// Every cached record, sorted by path
    pub fn snapshot(&self) -> Vec<FileState> {
        let inner = self.read();
        let mut all: Vec<FileState> = inner.entries.values().map(|s| inner.served(s)).collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }

    /// Apply one refresh batch atomically
    ///
    /// Every record gets the same new sequence number. Paths covered by the
    /// scope but absent from `records` become `Unmodified` after a full
    /// refresh and are forgotten after a scoped one (the caller reports
    /// tracked-clean paths explicitly).
    pub fn apply_refresh(
        &self,
        scope: &RefreshScope,
        records: Vec<FileState>,
        epoch: u64,
    ) -> Result<RefreshDelta> {
        let mut inner = self.write();
        if epoch > inner.epoch {
            return Err(CacheError::EpochAhead {
                batch: epoch,
                current: inner.epoch,
            }
            .into());
        }

        let reported: HashSet<String> = records.iter().map(|r| r.path.clone()).collect();
        if reported.len() != records.len() {
            return Err(CacheError::Inconsistent("duplicate path in refresh batch".to_string()).into());
        }

        inner.sequence += 1;
        let sequence = inner.sequence;
        let stale = epoch < inner.epoch;
        let now = Utc::now();
        let mut changed = Vec::new();

        let covered: Vec<String> = match scope {
            RefreshScope::Full => inner.entries.keys().cloned().collect(),
            RefreshScope::Paths(paths) => paths.clone(),
        };

        for path in covered.into_iter().filter(|p| !reported.contains(p)) {
            match scope {
                RefreshScope::Full => {
                    if let Some(existing) = inner.entries.get_mut(&path) {
                        let mut clean = FileState::new(path.clone(), WorkingCopyStatus::Unmodified);
                        clean.classification = existing.classification;
                        clean.sequence = sequence;
                        clean.epoch = epoch;
                        clean.stale = stale;
                        clean.refreshed_at = now;
                        if !existing.same_state(&clean) {
                            changed.push(path);
                        }
                        *existing = clean;
                    }
                }
                RefreshScope::Paths(_) => {
                    if inner.entries.remove(&path).is_some() {
                        changed.push(path);
                    }
                }
            }
        }

        for mut record in records {
            record.sequence = sequence;
            record.epoch = epoch;
            record.stale = stale;
            record.refreshed_at = now;
            let differs = inner
                .entries
                .get(&record.path)
                .is_none_or(|old| !old.same_state(&record));
            if differs {
                changed.push(record.path.clone());
            }
            inner.entries.insert(record.path.clone(), record);
        }

        changed.sort();
        debug!(
            sequence,
            epoch,
            changed = changed.len(),
            total = inner.entries.len(),
            "applied refresh"
        );
        Ok(RefreshDelta { sequence, changed })
    }

    /// Flag paths as possibly outdated; returns the paths that were not stale yet
    pub fn mark_stale(&self, paths: &[String]) -> Vec<String> {
        let mut inner = self.write();
        let mut marked = Vec::new();
        for path in paths {
            if let Some(state) = inner.entries.get_mut(path) {
                if !state.stale {
                    state.stale = true;
                    marked.push(path.clone());
                }
            }
        }
        marked
    }

    pub fn mark_all_stale(&self) -> Vec<String> {
        let mut inner = self.write();
        let mut marked: Vec<String> = inner
            .entries
            .values_mut()
            .filter(|s| !s.stale)
            .map(|s| {
                s.stale = true;
                s.path.clone()
            })
            .collect();
        marked.sort();
        marked
    }

    /// Start a new epoch; every existing record is served stale until refreshed
    pub fn invalidate_all(&self) -> u64 {
        let mut inner = self.write();
        inner.epoch += 1;
        debug!(epoch = inner.epoch, "cache invalidated");
        inner.epoch
    }

    pub fn remove(&self, paths: &[String]) -> Vec<String> {
        let mut inner = self.write();
        paths
            .iter()
            .filter(|p| inner.entries.remove(p.as_str()).is_some())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn record(path: &str, status: WorkingCopyStatus) -> FileState {
        FileState::new(path, status)
    }

    fn observable(states: Vec<FileState>) -> Vec<(String, WorkingCopyStatus, bool)> {
        states.into_iter().map(|s| (s.path, s.status, s.stale)).collect()
    }

    #[test]
    fn test_absent_vs_clean() {
        let cache = StateCache::new();
        cache
            .apply_refresh(
                &RefreshScope::paths(["a.txt"]),
                vec![record("a.txt", WorkingCopyStatus::Unmodified)],
                0,
            )
            .unwrap();
        assert_eq!(cache.get("a.txt").unwrap().status, WorkingCopyStatus::Unmodified);
        assert!(cache.get("never.txt").is_none());
    }

    #[test]
    fn test_round_trip() {
        let cache = StateCache::new();
        let records = vec![
            record("src/a.cpp", WorkingCopyStatus::Modified).with_revision("abc"),
            record("src/b.cpp", WorkingCopyStatus::Added),
        ];
        let delta = cache
            .apply_refresh(&RefreshScope::Full, records.clone(), 0)
            .unwrap();
        assert_eq!(delta.changed, vec!["src/a.cpp".to_string(), "src/b.cpp".to_string()]);

        let got = cache.get_batch(&["src/a.cpp".to_string(), "src/b.cpp".to_string()]);
        for expected in &records {
            let actual = &got[&expected.path];
            assert!(actual.same_state(expected));
            assert_eq!(actual.sequence, delta.sequence);
        }
    }

    #[test]
    fn test_full_refresh_cleans_unreported() {
        let cache = StateCache::new();
        cache
            .apply_refresh(&RefreshScope::Full, vec![record("a", WorkingCopyStatus::Modified)], 0)
            .unwrap();
        let delta = cache.apply_refresh(&RefreshScope::Full, vec![], 0).unwrap();
        assert_eq!(delta.changed, vec!["a".to_string()]);
        assert_eq!(cache.get("a").unwrap().status, WorkingCopyStatus::Unmodified);
        assert!(cache.changed().is_empty());
    }

    #[test]
    fn test_scoped_refresh_forgets_untracked_absent() {
        let cache = StateCache::new();
        cache
            .apply_refresh(
                &RefreshScope::Full,
                vec![
                    record("tmp.log", WorkingCopyStatus::Untracked),
                    record("keep.txt", WorkingCopyStatus::Modified),
                ],
                0,
            )
            .unwrap();
        cache
            .apply_refresh(&RefreshScope::paths(["tmp.log"]), vec![], 0)
            .unwrap();
        assert!(cache.get("tmp.log").is_none());
        assert_eq!(cache.get("keep.txt").unwrap().status, WorkingCopyStatus::Modified);
    }

    #[test]
    fn test_epoch_ahead_rejected() {
        let cache = StateCache::new();
        let err = cache
            .apply_refresh(&RefreshScope::Full, vec![record("a", WorkingCopyStatus::Added)], 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CacheInconsistent);
        assert!(matches!(err, Error::Cache(CacheError::EpochAhead { batch: 1, current: 0 })));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_old_epoch_served_stale() {
        let cache = StateCache::new();
        cache
            .apply_refresh(&RefreshScope::Full, vec![record("a", WorkingCopyStatus::Added)], 0)
            .unwrap();
        assert!(!cache.get("a").unwrap().stale);

        assert_eq!(cache.invalidate_all(), 1);
        assert!(cache.get("a").unwrap().stale);

        cache
            .apply_refresh(&RefreshScope::paths(["b"]), vec![record("b", WorkingCopyStatus::Added)], 0)
            .unwrap();
        assert!(cache.get("b").unwrap().stale);

        cache
            .apply_refresh(&RefreshScope::paths(["a"]), vec![record("a", WorkingCopyStatus::Added)], 1)
            .unwrap();
        assert!(!cache.get("a").unwrap().stale);
    }

    #[test]
    fn test_mark_stale() {
        let cache = StateCache::new();
        cache
            .apply_refresh(
                &RefreshScope::Full,
                vec![record("a", WorkingCopyStatus::Added), record("b", WorkingCopyStatus::Added)],
                0,
            )
            .unwrap();
        assert_eq!(cache.mark_stale(&["a".to_string(), "zzz".to_string()]), vec!["a".to_string()]);
        assert!(cache.get("a").unwrap().stale);
        assert!(!cache.get("b").unwrap().stale);
        assert_eq!(cache.mark_all_stale(), vec!["b".to_string()]);
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let cache = StateCache::new();
        let result = cache.apply_refresh(
            &RefreshScope::Full,
            vec![record("a", WorkingCopyStatus::Added), record("a", WorkingCopyStatus::Modified)],
            0,
        );
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_scope_covers() {
        let scope = RefreshScope::paths(["b", "a", "b"]);
        assert_eq!(scope, RefreshScope::Paths(vec!["a".to_string(), "b".to_string()]));
        assert!(scope.covers("a"));
        assert!(!scope.covers("c"));
        assert!(RefreshScope::Full.covers("anything"));
    }

    fn any_status() -> impl Strategy<Value = WorkingCopyStatus> {
        prop::sample::select(vec![
            WorkingCopyStatus::Unmodified,
            WorkingCopyStatus::Modified,
            WorkingCopyStatus::Added,
            WorkingCopyStatus::Deleted,
            WorkingCopyStatus::Untracked,
            WorkingCopyStatus::Ignored,
        ])
    }

    proptest! {
        #[test]
        fn prop_apply_is_idempotent(
            batch in prop::collection::hash_map("[a-z]{1,6}", any_status(), 0..30),
            full in any::<bool>(),
        ) {
            let records: Vec<FileState> = batch
                .iter()
                .map(|(path, status)| record(path, *status))
                .collect();
            let scope = if full {
                RefreshScope::Full
            } else {
                RefreshScope::paths(batch.keys().cloned())
            };

            let cache = StateCache::new();
            cache.apply_refresh(&scope, records.clone(), 0).unwrap();
            let first = observable(cache.snapshot());

            let delta = cache.apply_refresh(&scope, records, 0).unwrap();
            prop_assert!(delta.changed.is_empty());
            prop_assert_eq!(first, observable(cache.snapshot()));
        }
    }
}
