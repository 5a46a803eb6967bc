//! Locating the git binary and the working-copy root

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{ConfigError, Result, RunnerError};

#[cfg(windows)]
const GIT_EXECUTABLE: &str = "git.exe";
#[cfg(not(windows))]
const GIT_EXECUTABLE: &str = "git";

#[cfg(windows)]
const WELL_KNOWN_LOCATIONS: &[&str] = &[
    r"C:\Program Files\Git\bin\git.exe",
    r"C:\Program Files (x86)\Git\bin\git.exe",
    r"C:\Program Files\Git\cmd\git.exe",
];
#[cfg(not(windows))]
const WELL_KNOWN_LOCATIONS: &[&str] = &[
    "/usr/bin/git",
    "/usr/local/bin/git",
    "/opt/homebrew/bin/git",
    "/opt/local/bin/git",
];

/// Find the git executable: configured path, then `PATH`, then well-known locations
#[instrument(skip(config))]
pub fn find_binary(config: &Config) -> Result<PathBuf> {
    if let Some(configured) = &config.binary_path {
        if configured.is_file() {
            return Ok(configured.clone());
        }
        return Err(RunnerError::ToolNotFound(configured.clone()).into());
    }

    if let Some(path) = std::env::var_os("PATH") {
        if let Some(found) = std::env::split_paths(&path)
            .map(|dir| dir.join(GIT_EXECUTABLE))
            .find(|candidate| candidate.is_file())
        {
            debug!("Found git on PATH at {:?}", found);
            return Ok(found);
        }
    }

    WELL_KNOWN_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| RunnerError::ToolNotFound(PathBuf::from(GIT_EXECUTABLE)).into())
}

/// Discover the working-copy root containing `start` (searches parent directories)
#[instrument(skip_all, fields(start = %start.as_ref().display()))]
pub fn find_root(start: impl AsRef<Path>) -> Option<PathBuf> {
    let start = start.as_ref();
    let repo = gix::discover(start).ok()?;
    let root = repo
        .path()
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| start.to_path_buf());
    debug!("Discovered repository at {:?}", root);
    Some(root)
}

/// Resolve the configured (or current) directory to a working-copy root
pub fn resolve_root(config: &Config) -> Result<PathBuf> {
    let start = match &config.repository_root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    find_root(&start).ok_or_else(|| ConfigError::NotConfigured("repository_root").into())
}
