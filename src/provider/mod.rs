//! Host-facing provider
//!
//! [`GitProvider`] exposes the cache and the dispatcher through the host's
//! provider contract and translates paths and statuses on the way.

mod facade;
mod host;

pub use facade::*;
pub use host::*;
