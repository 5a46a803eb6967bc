//! `git for-each-ref refs/heads` parsing

use serde::Serialize;

use crate::error::Result;

use super::MalformedTally;

/// A local branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub current: bool,
    pub commit_id: String,
    pub upstream: Option<String>,
}

/// Parse `%(HEAD)\t%(refname:short)\t%(objectname)\t%(upstream:short)` lines
pub fn parse_branches(output: &str) -> Result<Vec<BranchInfo>> {
    let mut tally = MalformedTally::new("for-each-ref");
    let mut branches = Vec::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        tally.line();
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            [head, name, commit, upstream] if !name.is_empty() => branches.push(BranchInfo {
                name: name.to_string(),
                current: head.trim() == "*",
                commit_id: commit.to_string(),
                upstream: (!upstream.is_empty()).then(|| upstream.to_string()),
            }),
            _ => tally.malformed(line),
        }
    }

    tally.finish()?;
    Ok(branches)
}
