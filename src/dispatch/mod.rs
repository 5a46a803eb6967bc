//! Operation dispatch
//!
//! Requests are queued FIFO and executed one at a time by a single worker;
//! callers receive an [`OperationHandle`] and never block on git.

mod handler;
mod operation;
mod queue;
mod worker;

pub use handler::*;
pub use operation::*;
pub use worker::*;
