//! `git status --porcelain` parsing

use crate::cache::WorkingCopyStatus;
use crate::error::Result;

use super::{MalformedTally, unquote_path};

/// One record produced from a porcelain status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub status: WorkingCopyStatus,
    /// Old path, set on the new-path side of a rename
    pub renamed_from: Option<String>,
    /// Raw index (`X`) code
    pub index: char,
    /// Raw worktree (`Y`) code
    pub worktree: char,
}

const STATUS_CODES: &str = " MTADRCU?!";

/// Map the two-letter porcelain code to a single status
///
/// Precedence: conflicted > deleted > renamed > added > modified >
/// untracked > ignored > unmodified.
pub fn status_from_codes(x: char, y: char) -> WorkingCopyStatus {
    let either = |c: char| x == c || y == c;

    if either('U') || (x == 'A' && y == 'A') || (x == 'D' && y == 'D') {
        WorkingCopyStatus::Conflicted
    } else if either('D') {
        WorkingCopyStatus::Deleted
    } else if either('R') {
        WorkingCopyStatus::Renamed
    } else if either('A') || either('C') {
        WorkingCopyStatus::Added
    } else if either('M') || either('T') {
        WorkingCopyStatus::Modified
    } else if x == '?' && y == '?' {
        WorkingCopyStatus::Untracked
    } else if x == '!' && y == '!' {
        WorkingCopyStatus::Ignored
    } else {
        WorkingCopyStatus::Unmodified
    }
}

/// Split `old -> new`, honouring quoted paths
fn split_rename(rest: &str) -> Option<(&str, &str)> {
    if rest.starts_with('"') {
        let bytes = rest.as_bytes();
        let mut i = 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'"' => break,
                _ => i += 1,
            }
        }
        let end = i + 1;
        let tail = rest.get(end..)?;
        let new = tail.strip_prefix(" -> ")?;
        Some((&rest[..end], new))
    } else {
        rest.split_once(" -> ")
    }
}

/// Parse porcelain v1 status output
///
/// A rename line yields two records: `Deleted` for the old path, then the
/// new path with `renamed_from` set.
pub fn parse_status(output: &str) -> Result<Vec<StatusEntry>> {
    let mut tally = MalformedTally::new("status");
    let mut entries = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        tally.line();

        let mut chars = line.chars();
        let (Some(x), Some(y), Some(' ')) = (chars.next(), chars.next(), chars.next()) else {
            tally.malformed(line);
            continue;
        };
        if !STATUS_CODES.contains(x) || !STATUS_CODES.contains(y) {
            tally.malformed(line);
            continue;
        }
        let rest = chars.as_str();
        if rest.is_empty() {
            tally.malformed(line);
            continue;
        }

        let status = status_from_codes(x, y);
        let is_move = x == 'R' || y == 'R' || x == 'C' || y == 'C';

        match split_rename(rest).filter(|_| is_move) {
            Some((old, new)) => {
                let (old, new) = (unquote_path(old), unquote_path(new));
                if old.is_empty() || new.is_empty() {
                    tally.malformed(line);
                    continue;
                }
                let copied = x == 'C' || y == 'C';
                if !copied {
                    entries.push(StatusEntry {
                        path: old.clone(),
                        status: WorkingCopyStatus::Deleted,
                        renamed_from: None,
                        index: x,
                        worktree: y,
                    });
                }
                entries.push(StatusEntry {
                    path: new,
                    status,
                    renamed_from: (!copied).then_some(old),
                    index: x,
                    worktree: y,
                });
            }
            None => entries.push(StatusEntry {
                path: unquote_path(rest),
                status,
                renamed_from: None,
                index: x,
                worktree: y,
            }),
        }
    }

    tally.finish()?;
    Ok(entries)
}

/// True for stderr lines git prints when a requested path lies outside the repository
pub fn is_outside_repository(message: &str) -> bool {
    message.contains("' is outside repository")
}
