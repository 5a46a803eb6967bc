//! Tool version and commit summary parsing

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{ParseError, Result};

static GIT_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"git version (\d+)\.(\d+)(?:\.(\d+))?(?:\.windows\.(\d+))?").unwrap()
});

static LFS_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"git-lfs/(\d+)\.(\d+)\.(\d+)").unwrap()
});

fn number(caps: &regex::Captures<'_>, i: usize) -> u32 {
    caps.get(i)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Parsed `git version` output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GitVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub windows_build: Option<u32>,
}

impl GitVersion {
    pub fn parse(output: &str) -> Result<Self> {
        let caps = GIT_VERSION.captures(output).ok_or_else(|| ParseError::Invalid {
            what: "version",
            reason: format!("unrecognised version string {:?}", output.trim()),
        })?;
        Ok(Self {
            major: number(&caps, 1),
            minor: number(&caps, 2),
            patch: number(&caps, 3),
            windows_build: caps.get(4).and_then(|m| m.as_str().parse().ok()),
        })
    }
}

impl fmt::Display for GitVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(build) = self.windows_build {
            write!(f, ".windows.{build}")?;
        }
        Ok(())
    }
}

/// Parsed `git lfs version` output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LfsVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl LfsVersion {
    pub fn parse(output: &str) -> Result<Self> {
        let caps = LFS_VERSION.captures(output).ok_or_else(|| ParseError::Invalid {
            what: "lfs version",
            reason: format!("unrecognised version string {:?}", output.trim()),
        })?;
        Ok(Self {
            major: number(&caps, 1),
            minor: number(&caps, 2),
            patch: number(&caps, 3),
        })
    }

    /// File locking arrived in Git LFS 2.0.0
    pub fn supports_locking(&self) -> bool {
        self.major >= 2
    }
}

impl fmt::Display for LfsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// HEAD commit id and subject from `git log -1 --format=%H %s`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub commit_id: String,
    pub summary: String,
}

impl CommitSummary {
    pub fn short_id(&self) -> &str {
        self.commit_id.get(..8).unwrap_or(&self.commit_id)
    }
}

pub fn parse_commit_summary(output: &str) -> Result<CommitSummary> {
    let line = output.lines().next().unwrap_or_default().trim();
    let (id, summary) = line.split_once(' ').unwrap_or((line, ""));
    if id.len() < 7 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::Invalid {
            what: "commit summary",
            reason: format!("expected a commit id, got {line:?}"),
        }
        .into());
    }
    Ok(CommitSummary {
        commit_id: id.to_string(),
        summary: summary.to_string(),
    })
}
