//! `git log --follow --date=raw --name-status --pretty=medium` parsing

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ParseError, Result};

/// What a commit did to the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Add,
    Edit,
    Delete,
    Branch,
    Unknown,
}

impl FileAction {
    fn from_status(status: &str) -> Self {
        match status.chars().next() {
            Some('A') => Self::Add,
            Some('M') | Some('T') => Self::Edit,
            Some('D') => Self::Delete,
            Some('R') | Some('C') => Self::Branch,
            _ => Self::Unknown,
        }
    }
}

/// One entry of a file's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    pub commit_id: String,
    pub short_id: String,
    pub author: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub action: FileAction,
    pub file_name: String,
    /// 1 for the oldest listed revision, highest for the newest
    pub revision_number: usize,
}

#[derive(Default)]
struct Pending {
    commit_id: String,
    author: String,
    date: Option<DateTime<Utc>>,
    message: Vec<String>,
    action: Option<FileAction>,
    file_name: String,
}

fn invalid(reason: String) -> crate::error::Error {
    ParseError::Invalid {
        what: "log",
        reason,
    }
    .into()
}

impl Pending {
    fn finish(self) -> Result<Revision> {
        let date = self
            .date
            .ok_or_else(|| invalid(format!("commit {} has no date", self.commit_id)))?;
        let short_id = self.commit_id.chars().take(8).collect();
        Ok(Revision {
            short_id,
            commit_id: self.commit_id,
            author: self.author,
            date,
            message: self.message.join("\n"),
            action: self.action.unwrap_or(FileAction::Unknown),
            file_name: self.file_name,
            revision_number: 0,
        })
    }
}

/// `1500000000 +0200` → UTC timestamp
fn parse_raw_date(value: &str) -> Option<DateTime<Utc>> {
    let seconds: i64 = value.split_whitespace().next()?.parse().ok()?;
    DateTime::from_timestamp(seconds, 0)
}

/// Parse a file history, newest first
pub fn parse_log(output: &str) -> Result<Vec<Revision>> {
    let mut revisions = Vec::new();
    let mut current: Option<Pending> = None;

    for line in output.lines() {
        if let Some(id) = line.strip_prefix("commit ") {
            if let Some(done) = current.take() {
                revisions.push(done.finish()?);
            }
            current = Some(Pending {
                commit_id: id.split_whitespace().next().unwrap_or_default().to_string(),
                ..Pending::default()
            });
            continue;
        }

        let Some(pending) = current.as_mut() else {
            if line.trim().is_empty() {
                continue;
            }
            return Err(invalid(format!("expected a commit header, got {line:?}")));
        };

        if let Some(author) = line.strip_prefix("Author:") {
            let author = author.trim();
            pending.author = author
                .split_once(" <")
                .map(|(name, _)| name)
                .unwrap_or(author)
                .to_string();
        } else if let Some(date) = line.strip_prefix("Date:") {
            pending.date = parse_raw_date(date.trim());
        } else if let Some(message) = line.strip_prefix("    ") {
            pending.message.push(message.to_string());
        } else if line.starts_with("Merge:") || line.trim().is_empty() {
            continue;
        } else if let Some((status, rest)) = line.split_once('\t') {
            // Renames list `old<TAB>new`; the file is known by its newest name
            pending.action = Some(FileAction::from_status(status));
            pending.file_name = rest.rsplit('\t').next().unwrap_or(rest).to_string();
        }
    }

    if let Some(done) = current.take() {
        revisions.push(done.finish()?);
    }

    let count = revisions.len();
    for (i, revision) in revisions.iter_mut().enumerate() {
        revision.revision_number = count - i;
    }
    Ok(revisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
commit 97a4e7626681895e073aaefd68b8ac087db81b0b
Author: Sébastien Rombauts <sebastien.rombauts@gmail.com>
Date:   1424030336 +0100

    Another commit used to test History

     - with many lines
     - some <xml>
     - and strange characters $*+

M\tContent/Blueprints/Blueprint_CeilingLight.uasset

commit 355f64fc0b3b1d5b2d8c7ac4b5bdc1e2a3f4c5d6
Merge: 1111111 2222222
Author: Alice <alice@example.com>
Date:   1424000000 +0100

    Rename light

R100\tContent/Light.uasset\tContent/Blueprints/Blueprint_CeilingLight.uasset
";

    #[test]
    fn test_parse_history() {
        let revisions = parse_log(SAMPLE).unwrap();
        assert_eq!(revisions.len(), 2);

        let newest = &revisions[0];
        assert_eq!(newest.short_id, "97a4e762");
        assert_eq!(newest.author, "Sébastien Rombauts");
        assert_eq!(newest.date.timestamp(), 1424030336);
        assert_eq!(newest.action, FileAction::Edit);
        assert_eq!(newest.revision_number, 2);
        assert!(newest.message.starts_with("Another commit used to test History\n"));
        assert!(newest.message.contains(" - some <xml>"));

        let oldest = &revisions[1];
        assert_eq!(oldest.action, FileAction::Branch);
        assert_eq!(oldest.file_name, "Content/Blueprints/Blueprint_CeilingLight.uasset");
        assert_eq!(oldest.revision_number, 1);
    }

    #[test]
    fn test_empty_history() {
        assert!(parse_log("").unwrap().is_empty());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_log("not a log\n").is_err());
    }
}
