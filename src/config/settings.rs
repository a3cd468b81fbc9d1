//! Configuration settings and validation.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the optional configuration file at the repository root.
pub const CONFIG_FILE_NAME: &str = "repodoc.toml";

/// Ignore file picked up from the repository root when none is configured.
pub const DEFAULT_IGNORE_FILE: &str = ".repodocignore";

/// Main configuration for a documentation run.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the source tree to document.
    pub repo_root: PathBuf,

    /// Directory (relative to the root) holding the persisted hierarchy.
    pub hierarchy_dir: PathBuf,

    /// File extensions to scan, without the leading dot.
    pub extensions: Vec<String>,

    /// Newline-delimited ignore-pattern file.
    pub ignore_file: Option<PathBuf>,

    /// Extra ignore patterns, same syntax as the ignore file.
    pub ignore_patterns: Vec<String>,

    /// Honour `.gitignore` files while walking.
    pub respect_gitignore: bool,

    /// Maximum number of concurrent generation jobs.
    pub max_workers: usize,

    /// Per-job timeout in seconds.
    pub job_timeout_secs: u64,

    /// Retries after the first failed attempt.
    pub max_retries: u32,

    /// Base backoff between attempts, in milliseconds.
    pub retry_backoff_ms: u64,

    /// How many caller levels a change invalidates (0 = only the changed entity).
    pub propagation_depth: usize,

    /// Persist the hierarchy after this many job completions.
    pub checkpoint_every: usize,

    /// Documentation revisions retained per entity.
    pub max_doc_revisions: usize,

    /// Natural language the documentation is written in.
    pub doc_language: String,

    /// Model name passed to the generation backend.
    pub model: String,

    /// Base URL of the OpenAI-compatible backend.
    pub base_url: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            hierarchy_dir: PathBuf::from(".project_doc_record"),
            extensions: vec!["py".to_string(), "rs".to_string(), "go".to_string()],
            ignore_file: None,
            ignore_patterns: Vec::new(),
            respect_gitignore: true,
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get().min(4))
                .unwrap_or(4),
            job_timeout_secs: 60,
            max_retries: 3,
            retry_backoff_ms: 500,
            propagation_depth: 1,
            checkpoint_every: 10,
            max_doc_revisions: 3,
            doc_language: "English".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.2,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a default configuration rooted at `repo_root`.
    #[must_use]
    pub fn for_root(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// Keys missing from the file keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| Error::config(format!("invalid config {}: {e}", path.display())))
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if !self.repo_root.is_dir() {
            return Err(Error::config(format!(
                "repository root '{}' is not a directory",
                self.repo_root.display()
            )));
        }

        if self.extensions.is_empty() {
            return Err(Error::config("extensions cannot be empty"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.max_workers == 0 {
            return Err(Error::config("max_workers cannot be 0"));
        }

        if self.max_workers > 32 {
            return Err(Error::config("max_workers cannot exceed 32"));
        }

        if self.job_timeout_secs == 0 {
            return Err(Error::config("job_timeout_secs cannot be 0"));
        }

        if self.max_doc_revisions == 0 {
            return Err(Error::config("max_doc_revisions cannot be 0"));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::config("temperature must be within 0.0..=2.0"));
        }

        Ok(())
    }

    /// Absolute location of the persisted hierarchy.
    #[must_use]
    pub fn hierarchy_path(&self) -> PathBuf {
        self.repo_root.join(&self.hierarchy_dir)
    }

    /// Ignore file to load, if any.
    ///
    /// An explicitly configured file is always returned (and must be readable);
    /// otherwise `.repodocignore` at the root is used when it exists.
    #[must_use]
    pub fn resolved_ignore_file(&self) -> Option<PathBuf> {
        match &self.ignore_file {
            Some(path) if path.is_absolute() => Some(path.clone()),
            Some(path) => Some(self.repo_root.join(path)),
            None => {
                let fallback = self.repo_root.join(DEFAULT_IGNORE_FILE);
                fallback.is_file().then_some(fallback)
            }
        }
    }

    /// Per-job timeout.
    #[must_use]
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Base retry backoff.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rooted(tmp: &TempDir) -> Config {
        Config::for_root(tmp.path())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.propagation_depth, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.hierarchy_dir, PathBuf::from(".project_doc_record"));
        assert!(config.extensions.contains(&"py".to_string()));
    }

    #[test]
    fn test_validate_ok() {
        let tmp = TempDir::new().unwrap();
        assert!(rooted(&tmp).validate().is_ok());
    }

    #[test]
    fn test_validate_missing_root() {
        let config = Config::for_root("/nonexistent/repodoc/root");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_validate_empty_extensions() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            extensions: Vec::new(),
            ..rooted(&tmp)
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("extensions"));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            log_level: "verbose".to_string(),
            ..rooted(&tmp)
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log level"));
    }

    #[test]
    fn test_validate_workers_bounds() {
        let tmp = TempDir::new().unwrap();
        let zero = Config {
            max_workers: 0,
            ..rooted(&tmp)
        };
        assert!(zero.validate().unwrap_err().to_string().contains("max_workers"));

        let many = Config {
            max_workers: 100,
            ..rooted(&tmp)
        };
        assert!(many.validate().unwrap_err().to_string().contains("32"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            job_timeout_secs: 0,
            ..rooted(&tmp)
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_temperature() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            temperature: 3.5,
            ..rooted(&tmp)
        };
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("temperature"));
    }

    #[test]
    fn test_log_level_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        for level in ["TRACE", "Debug", "INFO", "Warn", "ERROR"] {
            let config = Config {
                log_level: level.to_string(),
                ..rooted(&tmp)
            };
            assert!(
                config.validate().is_ok(),
                "Level '{level}' should be valid (case insensitive)"
            );
        }
    }

    #[test]
    fn test_hierarchy_path() {
        let config = Config::for_root("/srv/project");
        assert_eq!(
            config.hierarchy_path(),
            PathBuf::from("/srv/project/.project_doc_record")
        );
    }

    #[test]
    fn test_resolved_ignore_file() {
        let tmp = TempDir::new().unwrap();
        let config = rooted(&tmp);
        assert!(config.resolved_ignore_file().is_none());

        std::fs::write(tmp.path().join(DEFAULT_IGNORE_FILE), "build/\n").unwrap();
        assert_eq!(
            config.resolved_ignore_file(),
            Some(tmp.path().join(DEFAULT_IGNORE_FILE))
        );

        let explicit = Config {
            ignore_file: Some(PathBuf::from("custom.ignore")),
            ..rooted(&tmp)
        };
        assert_eq!(
            explicit.resolved_ignore_file(),
            Some(tmp.path().join("custom.ignore"))
        );
    }

    #[test]
    fn test_from_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "propagation_depth = 2\nmax_workers = 8\nextensions = [\"py\"]\n",
        )
        .unwrap();

        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.propagation_depth, 2);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.extensions, vec!["py".to_string()]);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_from_toml_file_rejects_unknown_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "max_threads = 8\n").unwrap();

        let err = Config::from_toml_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
