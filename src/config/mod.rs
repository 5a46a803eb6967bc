//! Configuration module
//!
//! Handles the process-wide provider settings (`~/.config/gitsc/config.toml`)

mod settings;

pub use settings::*;
