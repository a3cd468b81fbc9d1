//! Configuration management for repodoc.
//!
//! Supports configuration from:
//! - Command-line arguments (highest priority)
//! - Environment variables
//! - Configuration file `repodoc.toml` (lowest priority)

mod settings;

pub use settings::{Config, CONFIG_FILE_NAME, DEFAULT_IGNORE_FILE};
