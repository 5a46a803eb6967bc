//! `git lfs locks` parsing

use serde::Deserialize;

use crate::error::{ParseError, Result};

use super::MalformedTally;

/// A file locked on the LFS server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub path: String,
    pub owner: String,
    pub id: Option<String>,
}

#[derive(Deserialize)]
struct JsonLock {
    id: Option<String>,
    path: String,
    owner: Option<JsonOwner>,
}

#[derive(Deserialize)]
struct JsonOwner {
    name: String,
}

/// Parse the lock list
///
/// Accepts the `--json` array and, for older LFS releases, the tabular
/// `path<TAB>owner<TAB>ID:n` listing. Unlisted paths are unlocked.
pub fn parse_locks(output: &str) -> Result<Vec<LockRecord>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        let locks: Vec<JsonLock> =
            serde_json::from_str(trimmed).map_err(|e| ParseError::Invalid {
                what: "lfs locks",
                reason: e.to_string(),
            })?;
        return Ok(locks
            .into_iter()
            .map(|lock| LockRecord {
                path: lock.path.replace('\\', "/"),
                owner: lock.owner.map(|o| o.name).unwrap_or_default(),
                id: lock.id,
            })
            .collect());
    }

    let mut tally = MalformedTally::new("lfs locks");
    let mut records = Vec::new();
    for line in trimmed.lines().filter(|l| !l.trim().is_empty()) {
        tally.line();
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        match fields.as_slice() {
            [path, owner, rest @ ..] if !path.is_empty() => records.push(LockRecord {
                path: path.replace('\\', "/"),
                owner: owner.to_string(),
                id: rest
                    .first()
                    .map(|id| id.trim_start_matches("ID:").to_string()),
            }),
            _ => tally.malformed(line),
        }
    }
    tally.finish()?;
    Ok(records)
}
