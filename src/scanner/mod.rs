//! Source scanning.
//!
//! This module provides:
//! - Ignore-pattern matching
//! - The repository walk yielding candidate source files
//! - Debounced watching for watch mode

pub mod filter;
pub mod walk;
pub mod watcher;

pub use filter::IgnoreRules;
pub use walk::{relative_path, scan, ScanResult, ScanSettings, ScanStats, ScanStatsSnapshot};
pub use watcher::{EventBatch, FileWatcher, DEBOUNCE_DURATION};
