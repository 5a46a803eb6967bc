//! Git integration module
//!
//! Every git operation runs out-of-process through a [`ToolRunner`]; gitoxide
//! is only used to discover the working-copy root.

pub mod command;
mod discovery;
mod executor;
mod repository;
#[cfg(test)]
pub(crate) mod testing;

pub use discovery::*;
pub use executor::*;
pub use repository::*;
