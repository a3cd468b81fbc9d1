//! Error types and Result aliases for repodoc.
//!
//! The taxonomy mirrors how failures are contained during a run:
//! - configuration and store errors are fatal and abort before any work,
//! - parse errors are local to one file (the file is skipped),
//! - generation errors are local to one entity (retried, then recorded).

use thiserror::Error;

/// Result type alias using repodoc's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for repodoc operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (bad root path, unreadable ignore file, invalid value).
    #[error("configuration error: {0}")]
    Config(String),

    /// A single source file could not be turned into entities.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Documentation generation failed for one entity.
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// The persisted hierarchy is unreadable or inconsistent.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Version-control query failed.
    #[error("vcs error: {0}")]
    Vcs(String),

    /// Filesystem watching failed.
    #[error("failed to watch path '{path}': {reason}")]
    Watch { path: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Per-file extraction errors.
#[derive(Error, Debug)]
pub enum ParseError {
    /// File could not be read.
    #[error("failed to read '{path}': {reason}")]
    Unreadable { path: String, reason: String },

    /// File is not valid UTF-8.
    #[error("'{path}' is not valid UTF-8")]
    Encoding { path: String },

    /// Syntax tree contains errors.
    #[error("syntax error in '{path}' at line {line}")]
    Syntax { path: String, line: usize },

    /// Grammar could not be loaded into the parser.
    #[error("failed to load {language} grammar: {reason}")]
    Grammar { language: String, reason: String },
}

/// Text-generation failures for a single entity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The backend did not answer within the per-job timeout.
    #[error("generation timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The backend returned an error.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend answered with no text.
    #[error("backend returned an empty response")]
    EmptyResponse,

    /// The run was aborted while the job was pending.
    #[error("generation cancelled")]
    Cancelled,
}

/// Persisted hierarchy errors. All of these are fatal.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Document is unreadable or internally inconsistent.
    #[error("hierarchy store at '{path}' is corrupted: {reason}")]
    Corrupted { path: String, reason: String },

    /// Document was written by an incompatible version.
    #[error("hierarchy schema version {found} does not match expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },

    /// Document could not be written.
    #[error("failed to write '{path}': {reason}")]
    Write { path: String, reason: String },
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl GenerationError {
    /// Whether the failure is worth another attempt.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl StoreError {
    /// Create a corruption error.
    pub fn corrupted(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
