//! File state cache
//!
//! Owns every [`FileState`] record; callers only ever receive copies.

mod state;
mod store;

pub use state::*;
pub use store::*;
