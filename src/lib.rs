//! repodoc library
//!
//! Incremental, graph-aware documentation regeneration for source trees.
//! A run scans the tree, extracts documentable entities, diffs them against
//! the persisted hierarchy, invalidates what changed along reference edges
//! and regenerates exactly the stale entities, callees before callers.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod extract;
pub mod generation;
pub mod hierarchy;
pub mod observability;
pub mod propagate;
pub mod resolver;
pub mod scanner;
pub mod schedule;
pub mod vcs;

pub use config::Config;
pub use engine::{Engine, RunSummary, StatusReport};
pub use error::{Error, Result};
