//! Argument vectors for every git invocation the provider issues
//!
//! Builders are pure: the same kind and parameters always produce the same
//! argument list, which keeps invocations reproducible in logs and tests.

use crate::error::{DispatchError, Result};

/// Split a path set into command-line sized batches
pub fn batches(paths: &[String], size: usize) -> std::slice::Chunks<'_, String> {
    paths.chunks(size.max(1))
}

fn with_paths(mut args: Vec<String>, paths: &[String]) -> Vec<String> {
    if !paths.is_empty() {
        args.push("--".to_string());
        args.extend(paths.iter().cloned());
    }
    args
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

pub fn version() -> Vec<String> {
    strings(&["version"])
}

pub fn lfs_version() -> Vec<String> {
    strings(&["lfs", "version"])
}

/// Porcelain status including ignored and every untracked file
pub fn status(paths: &[String]) -> Vec<String> {
    with_paths(
        strings(&["status", "--porcelain", "--ignored", "--untracked-files=all"]),
        paths,
    )
}

/// Index entries (mode, blob id, stage, path)
pub fn ls_files_stage(paths: &[String]) -> Vec<String> {
    with_paths(strings(&["ls-files", "--stage"]), paths)
}

/// Attribute query; the paths are written to stdin NUL-terminated
pub fn check_attr() -> Vec<String> {
    strings(&["check-attr", "-z", "--stdin", "binary", "diff", "filter"])
}

pub fn lfs_locks() -> Vec<String> {
    strings(&["lfs", "locks", "--json"])
}

pub fn add(paths: &[String]) -> Vec<String> {
    with_paths(strings(&["add"]), paths)
}

pub fn remove(paths: &[String]) -> Vec<String> {
    with_paths(strings(&["rm"]), paths)
}

/// Marking a conflict resolved stages the file
pub fn resolve(paths: &[String]) -> Vec<String> {
    add(paths)
}

pub fn reset(paths: &[String]) -> Vec<String> {
    with_paths(strings(&["reset", "-q"]), paths)
}

pub fn checkout_files(paths: &[String]) -> Vec<String> {
    with_paths(strings(&["checkout"]), paths)
}

/// Commit the given paths with the message read from stdin
pub fn commit(paths: &[String], amend: bool) -> Vec<String> {
    let mut args = strings(&["commit", "--file=-"]);
    if amend {
        args.push("--amend".to_string());
    }
    with_paths(args, paths)
}

pub fn pull_rebase(remote: &str) -> Vec<String> {
    strings(&["pull", "--rebase", "--autostash", remote, "HEAD"])
}

pub fn push(remote: &str) -> Vec<String> {
    strings(&["push", "--set-upstream", remote, "HEAD"])
}

pub fn lfs_lock(path: &str) -> Vec<String> {
    strings(&["lfs", "lock", "--", path])
}

pub fn lfs_unlock(path: &str) -> Vec<String> {
    strings(&["lfs", "unlock", "--", path])
}

/// Branch checkout; the trailing `--` keeps the name from being read as a path
///
/// Names git would take for an option are refused.
pub fn switch_branch(branch: &str, create: bool) -> Result<Vec<String>> {
    if branch.is_empty() || branch.starts_with('-') {
        return Err(DispatchError::InvalidArgument(format!("branch name {branch:?}")).into());
    }
    Ok(if create {
        strings(&["checkout", "-b", branch, "--"])
    } else {
        strings(&["checkout", branch, "--"])
    })
}

pub fn list_branches() -> Vec<String> {
    strings(&[
        "for-each-ref",
        "--format=%(HEAD)%09%(refname:short)%09%(objectname)%09%(upstream:short)",
        "refs/heads",
    ])
}

/// File history following renames
pub fn history(path: &str, max_count: usize) -> Vec<String> {
    vec![
        "log".to_string(),
        "--follow".to_string(),
        "--date=raw".to_string(),
        "--name-status".to_string(),
        "--pretty=medium".to_string(),
        format!("--max-count={max_count}"),
        "--".to_string(),
        path.to_string(),
    ]
}

pub fn current_branch() -> Vec<String> {
    strings(&["symbolic-ref", "--short", "--quiet", "HEAD"])
}

pub fn head_commit() -> Vec<String> {
    strings(&["log", "-1", "--format=%H %s"])
}

pub fn remote_url(remote: &str) -> Vec<String> {
    strings(&["remote", "get-url", remote])
}

pub fn config_value(key: &str) -> Vec<String> {
    strings(&["config", key])
}
