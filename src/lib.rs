//! gitsc - Git source-control provider core
//!
//! Runs git out-of-process, parses its output into a normalized file-state
//! model and serves that model to interactive callers without blocking them.
//!
//! # Architecture
//!
//! - **Command runner** - one subprocess per call, with timeout and output cap
//! - **Output parser** - pure functions from git output to typed records
//! - **State cache** - per-path file state with epoch-based invalidation
//! - **Operation dispatcher** - single worker executing a FIFO queue
//! - **Provider** - host-facing façade with path and status translation
//!
//! # Modules
//!
//! - [`git`] - Command runner, argument builders and repository context
//! - [`parse`] - Output parsers
//! - [`cache`] - File state cache
//! - [`dispatch`] - Operation queue and worker
//! - [`provider`] - [`GitProvider`] and host vocabulary
//! - [`config`] - Layered configuration
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod git;
pub mod parse;
pub mod provider;

pub use cache::{FileState, RefreshScope, StateCache, WorkingCopyStatus};
pub use config::Config;
pub use dispatch::{OperationHandle, OperationId, OperationRequest, ProviderEvent};
pub use error::{Error, ErrorKind, Result};
pub use provider::{GitProvider, HostStatus};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
