//! Debounced file system watching for watch mode.

#![allow(clippy::used_underscore_binding)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};
use tokio::sync::mpsc;

use super::filter::IgnoreRules;
use super::walk::{relative_path, ScanSettings};
use crate::{Error, Result};

/// Debounce duration for file events.
pub const DEBOUNCE_DURATION: Duration = Duration::from_millis(500);

/// Paths touched within one debounce window.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventBatch {
    pub paths: BTreeSet<PathBuf>,
}

impl EventBatch {
    /// Create a new empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: PathBuf) {
        self.paths.insert(path);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether any path in the batch could change the scan result.
    ///
    /// Deleted files count too: only the extension, ignore rules, and
    /// location are consulted, never the file itself.
    #[must_use]
    pub fn touches_sources(&self, root: &Path, rules: &IgnoreRules, settings: &ScanSettings) -> bool {
        let hierarchy_dir = relative_path(Path::new(""), &settings.hierarchy_dir);
        self.paths.iter().any(|path| {
            let Some(rel) = relative_path(root, path) else {
                return false;
            };
            if let Some(dir) = &hierarchy_dir {
                if rel == *dir || rel.starts_with(&format!("{dir}/")) {
                    return false;
                }
            }
            let hidden = rel.split('/').any(|c| c.starts_with('.'));
            !hidden && settings.is_candidate(path) && !rules.is_ignored(&rel, false)
        })
    }
}

/// Recursive watcher over the repository root.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    event_rx: mpsc::Receiver<EventBatch>,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root` recursively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Watch`] if the watcher cannot be created or the root
    /// cannot be watched.
    pub fn new(root: impl AsRef<Path>, debounce: Duration) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(Error::Watch {
                path: root.display().to_string(),
                reason: "directory does not exist".to_string(),
            });
        }
        // Events arrive with absolute paths.
        let root = root.canonicalize().map_err(|e| Error::Watch {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;

        let (batch_tx, event_rx) = mpsc::channel(100);
        let mut debouncer = new_debouncer(
            debounce,
            move |result: std::result::Result<
                Vec<notify_debouncer_mini::DebouncedEvent>,
                notify::Error,
            >| match result {
                Ok(events) => {
                    let mut batch = EventBatch::new();
                    for event in events {
                        if matches!(
                            event.kind,
                            DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
                        ) {
                            batch.add(event.path);
                        }
                    }
                    if !batch.is_empty() {
                        let _ = batch_tx.blocking_send(batch);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Watch error");
                }
            },
        )
        .map_err(|e| Error::Watch {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| Error::Watch {
                path: root.display().to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(path = %root.display(), "Watching directory");

        Ok(Self {
            _debouncer: debouncer,
            event_rx,
            root,
        })
    }

    /// Receive the next batch of events.
    ///
    /// Returns `None` if the watcher has been dropped.
    pub async fn recv(&mut self) -> Option<EventBatch> {
        self.event_rx.recv().await
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use tempfile::TempDir;

    fn batch(paths: &[&str]) -> EventBatch {
        let mut batch = EventBatch::new();
        for path in paths {
            batch.add(PathBuf::from(path));
        }
        batch
    }

    #[test]
    fn test_batch_dedupes() {
        let batch = batch(&["/repo/a.py", "/repo/a.py"]);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_touches_sources() {
        let settings = ScanSettings::from_config(&Config::default());
        let rules = IgnoreRules::parse("build/").unwrap();
        let root = Path::new("/repo");

        assert!(batch(&["/repo/src/a.py"]).touches_sources(root, &rules, &settings));
        assert!(!batch(&["/repo/README.md"]).touches_sources(root, &rules, &settings));
        assert!(!batch(&["/repo/build/a.py"]).touches_sources(root, &rules, &settings));
        assert!(!batch(&["/repo/.project_doc_record/project_hierarchy.json"])
            .touches_sources(root, &rules, &settings));
        assert!(!batch(&["/elsewhere/a.py"]).touches_sources(root, &rules, &settings));
    }

    #[test]
    fn test_watcher_nonexistent_dir() {
        let result = FileWatcher::new("/nonexistent/directory", DEBOUNCE_DURATION);
        assert!(matches!(result, Err(Error::Watch { .. })));
    }

    #[tokio::test]
    async fn test_watcher_starts() {
        let tmp = TempDir::new().unwrap();
        let watcher = FileWatcher::new(tmp.path(), DEBOUNCE_DURATION).unwrap();
        assert_eq!(watcher.root(), tmp.path().canonicalize().unwrap());
    }
}
