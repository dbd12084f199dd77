//! Configuration module
//!
//! Handles loading server and connection settings from a TOML file.

mod settings;

pub use settings::*;
