//! Source tree walk.
//!
//! Walks the repository with the `ignore` crate, prunes ignored directories
//! early, and yields candidate source files by extension.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ignore::WalkBuilder;

use super::filter::IgnoreRules;
use crate::{Config, Error, Result};

/// Walk options derived from [`Config`].
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Extension allow-list, without leading dots.
    pub extensions: Vec<String>,
    /// Honour `.gitignore` files.
    pub respect_gitignore: bool,
    /// Directory (relative to the root) that is never scanned.
    pub hierarchy_dir: PathBuf,
}

impl ScanSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            extensions: config.extensions.clone(),
            respect_gitignore: config.respect_gitignore,
            hierarchy_dir: config.hierarchy_dir.clone(),
        }
    }

    /// Whether `path` carries an allowed extension.
    #[must_use]
    pub fn is_candidate(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

/// Scan statistics.
#[derive(Debug, Default)]
pub struct ScanStats {
    pub files_found: AtomicU64,
    pub files_matched: AtomicU64,
    pub files_skipped: AtomicU64,
    pub errors: AtomicU64,
}

impl ScanStats {
    /// Create new stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of current stats.
    #[must_use]
    pub fn snapshot(&self) -> ScanStatsSnapshot {
        ScanStatsSnapshot {
            files_found: self.files_found.load(Ordering::Relaxed),
            files_matched: self.files_matched.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of scan stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStatsSnapshot {
    pub files_found: u64,
    pub files_matched: u64,
    pub files_skipped: u64,
    pub errors: u64,
}

/// Candidate files found by a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Paths relative to the root, `/`-separated, sorted.
    pub files: BTreeSet<String>,
    pub stats: ScanStatsSnapshot,
}

/// Render `path` relative to `root` with `/` separators.
#[must_use]
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Scan `root` for candidate source files.
///
/// Directories matched by `rules` are pruned without descending. Hidden
/// entries and the hierarchy directory are always skipped.
///
/// # Errors
///
/// Returns a configuration error if `root` is not a directory.
pub fn scan(root: &Path, rules: &IgnoreRules, settings: &ScanSettings) -> Result<ScanResult> {
    if !root.is_dir() {
        return Err(Error::config(format!(
            "repository root '{}' is not a directory",
            root.display()
        )));
    }

    let stats = ScanStats::new();
    tracing::info!(path = %root.display(), patterns = rules.len(), "Starting source scan");

    let filter_root = root.to_path_buf();
    let filter_rules = Arc::new(rules.clone());
    let hierarchy_dir = relative_path(Path::new(""), &settings.hierarchy_dir);

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(settings.respect_gitignore)
        .git_global(settings.respect_gitignore)
        .git_exclude(settings.respect_gitignore)
        .require_git(false)
        .ignore(false)
        .parents(false)
        .filter_entry(move |entry| {
            let Some(rel) = relative_path(&filter_root, entry.path()) else {
                return true;
            };
            if hierarchy_dir.as_deref() == Some(rel.as_str()) {
                return false;
            }
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !filter_rules.is_ignored(&rel, is_dir)
        })
        .build();

    let mut files = BTreeSet::new();
    for entry in walker {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                stats.files_found.fetch_add(1, Ordering::Relaxed);

                let entry_path = entry.path();
                if !settings.is_candidate(entry_path) {
                    stats.files_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                if let Some(rel) = relative_path(root, entry_path) {
                    files.insert(rel);
                    stats.files_matched.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error walking directory");
                stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let snapshot = stats.snapshot();
    tracing::info!(
        path = %root.display(),
        found = snapshot.files_found,
        matched = snapshot.files_matched,
        skipped = snapshot.files_skipped,
        errors = snapshot.errors,
        "Source scan complete"
    );

    Ok(ScanResult {
        files,
        stats: snapshot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn settings() -> ScanSettings {
        ScanSettings::from_config(&Config::default())
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x = 1\n").unwrap();
    }

    #[test]
    fn test_scan_filters_by_extension() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "app.py");
        touch(tmp.path(), "src/lib.rs");
        touch(tmp.path(), "README.md");

        let result = scan(tmp.path(), &IgnoreRules::empty(), &settings()).unwrap();
        let files: Vec<&str> = result.files.iter().map(String::as_str).collect();
        assert_eq!(files, vec!["app.py", "src/lib.rs"]);
        assert_eq!(result.stats.files_found, 3);
        assert_eq!(result.stats.files_skipped, 1);
    }

    #[test]
    fn test_scan_dir_only_pattern() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "build/gen.py");
        touch(tmp.path(), "pkg/build/deep.py");
        touch(tmp.path(), "main.py");
        fs::write(tmp.path().join("build.py"), "x = 1\n").unwrap();

        let rules = IgnoreRules::parse("build/\n").unwrap();
        let result = scan(tmp.path(), &rules, &settings()).unwrap();
        let files: Vec<&str> = result.files.iter().map(String::as_str).collect();
        assert_eq!(files, vec!["build.py", "main.py"]);
    }

    #[test]
    fn test_scan_dir_only_pattern_keeps_file_named_build() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("build"), "x = 1\n").unwrap();
        let settings = ScanSettings {
            extensions: vec!["py".to_string()],
            ..settings()
        };
        let rules = IgnoreRules::parse("build/\n").unwrap();
        assert!(!rules.is_ignored("build", false));

        let result = scan(tmp.path(), &rules, &settings).unwrap();
        assert_eq!(result.stats.files_found, 1);
    }

    #[test]
    fn test_scan_skips_hierarchy_dir() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "docs_store/keep.py");
        touch(tmp.path(), "a.py");
        let settings = ScanSettings {
            hierarchy_dir: PathBuf::from("docs_store"),
            ..settings()
        };

        let result = scan(tmp.path(), &IgnoreRules::empty(), &settings).unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(result.files.contains("a.py"));
    }

    #[test]
    fn test_scan_respects_gitignore() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "generated/out.py");
        touch(tmp.path(), "a.py");
        fs::write(tmp.path().join(".gitignore"), "generated/\n").unwrap();

        let result = scan(tmp.path(), &IgnoreRules::empty(), &settings()).unwrap();
        assert_eq!(result.files.len(), 1);

        let relaxed = ScanSettings {
            respect_gitignore: false,
            ..settings()
        };
        let result = scan(tmp.path(), &IgnoreRules::empty(), &relaxed).unwrap();
        assert_eq!(result.files.len(), 2);
    }

    #[test]
    fn test_scan_missing_root() {
        let err = scan(
            Path::new("/nonexistent/repodoc"),
            &IgnoreRules::empty(),
            &settings(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/repo"), Path::new("/repo/src/a.py")),
            Some("src/a.py".to_string())
        );
        assert_eq!(relative_path(Path::new("/repo"), Path::new("/repo")), None);
        assert_eq!(relative_path(Path::new("/repo"), Path::new("/other/a.py")), None);
    }

    #[test]
    fn test_is_candidate_case_insensitive() {
        let settings = settings();
        assert!(settings.is_candidate(Path::new("A.PY")));
        assert!(!settings.is_candidate(Path::new("Makefile")));
    }
}
