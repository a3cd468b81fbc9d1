//! Run drivers: `scan_and_update` and `status`.
//!
//! One run threads a single in-memory [`Hierarchy`] through every stage:
//! scan and extract, diff, apply, resolve, invalidate, plan, dispatch. The
//! store is written after the scan, at dispatch checkpoints, and at the end.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::detect::{diff, ScanSnapshot};
use crate::extract::ExtractorRegistry;
use crate::generation::Generator;
use crate::hierarchy::{
    DeletedItem, EntityKind, EntityStatus, Hierarchy, HierarchyStore, MetaInfo, StaleReason,
};
use crate::propagate::invalidate;
use crate::resolver::resolve;
use crate::scanner::{scan, FileWatcher, IgnoreRules, ScanSettings, DEBOUNCE_DURATION};
use crate::schedule::{DispatchPlan, DispatchSettings, Dispatcher, FailedEntity};
use crate::vcs::{ChangeLister, GitChangeLister, VcsChanges};
use crate::{Config, Error, Result};

/// End-of-run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entities discovered for the first time.
    pub added: usize,
    /// Entities whose documentation was (re)generated.
    pub updated: usize,
    /// Entities that exhausted their retries.
    pub failed: usize,
    /// Files skipped because they could not be extracted.
    pub skipped: usize,
    /// Entities removed with their file or identity.
    pub deleted: usize,
    /// Generation jobs started.
    pub jobs: usize,
    /// Whether the run was aborted.
    pub cancelled: bool,
    pub failures: Vec<FailedEntity>,
    /// Skipped file paths with the reason.
    pub skipped_files: BTreeMap<String, String>,
}

impl RunSummary {
    /// No failures and not cancelled.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    /// Process exit code for this run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "added {}, updated {}, failed {}, skipped {}, deleted {} ({} jobs{})",
            self.added,
            self.updated,
            self.failed,
            self.skipped,
            self.deleted,
            self.jobs,
            if self.cancelled { ", cancelled" } else { "" }
        )?;
        for failure in &self.failures {
            writeln!(
                f,
                "  failed: {} after {} attempt(s): {}",
                failure.qualified_path, failure.attempts, failure.error
            )?;
        }
        for (path, reason) in &self.skipped_files {
            writeln!(f, "  skipped: {path}: {reason}")?;
        }
        Ok(())
    }
}

/// One entry of [`StatusReport::stale`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleEntry {
    pub qualified_path: String,
    pub kind: EntityKind,
    pub status: EntityStatus,
    pub reason: Option<StaleReason>,
}

/// Staleness as it would be after scanning now, without generating anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub files: usize,
    pub entities: usize,
    pub added_files: usize,
    pub modified_files: usize,
    pub deleted_files: usize,
    /// Stale entities ordered by qualified path.
    pub stale: Vec<StaleEntry>,
    pub skipped_files: BTreeMap<String, String>,
    pub doc_version: String,
    /// Whether the last run left work unfinished.
    pub in_generation_process: bool,
    /// Version-control changes since `doc_version`, when available.
    pub vcs_changes: Option<VcsChanges>,
}

impl StatusReport {
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.stale.is_empty()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} files, {} entities, {} stale (files: +{} ~{} -{})",
            self.files,
            self.entities,
            self.stale.len(),
            self.added_files,
            self.modified_files,
            self.deleted_files
        )?;
        if self.in_generation_process {
            writeln!(f, "last run did not finish")?;
        }
        for entry in &self.stale {
            let reason = entry.reason.map_or_else(|| "failed".to_string(), |r| r.to_string());
            writeln!(f, "  {} {} ({reason})", entry.kind, entry.qualified_path)?;
        }
        for (path, reason) in &self.skipped_files {
            writeln!(f, "  skipped: {path}: {reason}")?;
        }
        if let Some(changes) = &self.vcs_changes {
            writeln!(
                f,
                "vcs since {}: +{} ~{} -{}",
                if self.doc_version.is_empty() { "-" } else { &self.doc_version },
                changes.added.len(),
                changes.modified.len(),
                changes.deleted.len()
            )?;
        }
        Ok(())
    }
}

/// What a scan did to the in-memory hierarchy.
struct Prepared {
    added: usize,
    deleted: usize,
    added_files: usize,
    modified_files: usize,
    deleted_files: usize,
}

/// Owns configuration and collaborators for documentation runs.
pub struct Engine {
    config: Config,
    store: HierarchyStore,
    registry: Arc<ExtractorRegistry>,
    generator: Arc<dyn Generator>,
    vcs: Option<Arc<dyn ChangeLister>>,
    cancel: CancellationToken,
    /// Held for a whole update; the store has a single writer.
    run_lock: Mutex<()>,
}

impl Engine {
    /// Create an engine for a validated configuration.
    ///
    /// A git change lister is attached when the root is a git work tree.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn new(config: Config, generator: Arc<dyn Generator>) -> Result<Self> {
        config.validate()?;
        let store = HierarchyStore::new(config.hierarchy_path());
        let vcs = GitChangeLister::detect(&config.repo_root)
            .map(|lister| Arc::new(lister) as Arc<dyn ChangeLister>);
        Ok(Self {
            config,
            store,
            registry: Arc::new(ExtractorRegistry::new()),
            generator,
            vcs,
            cancel: CancellationToken::new(),
            run_lock: Mutex::new(()),
        })
    }

    /// Replace the version-control collaborator.
    #[must_use]
    pub fn with_change_lister(mut self, lister: Option<Arc<dyn ChangeLister>>) -> Self {
        self.vcs = lister;
        self
    }

    /// Abort signal for in-progress and future runs.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &HierarchyStore {
        &self.store
    }

    /// Bring the stored documentation up to date with the source tree.
    ///
    /// # Errors
    ///
    /// Returns configuration errors (unreadable ignore file, missing root)
    /// and store errors (corrupted or unwritable hierarchy). Per-file and
    /// per-entity failures are reported in the summary instead.
    ///
    /// Concurrent calls on one engine run one after another, so a later
    /// call only sees what the earlier one left stale.
    pub async fn scan_and_update(&self) -> Result<RunSummary> {
        let _run = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!("Update already running, waiting for it to finish");
                self.run_lock.lock().await
            }
        };
        let started = Instant::now();
        let (mut hierarchy, mut meta) = self.store.load()?;
        let snapshot = self.snapshot().await?;
        let prepared = self.prepare(&mut hierarchy, &mut meta, &snapshot)?;

        let stale = hierarchy.stale_ids();
        meta.in_generation_process = !stale.is_empty();
        self.store.save(&hierarchy, &meta)?;

        let plan = DispatchPlan::build(&stale, &hierarchy);
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.generator),
            DispatchSettings::from_config(&self.config),
        )
        .with_cancellation(self.cancel.clone());
        let report = {
            let store = &self.store;
            let meta = &meta;
            dispatcher
                .run(&mut hierarchy, &plan, &mut |h| store.save(h, meta))
                .await?
        };

        let complete = !report.cancelled && hierarchy.stale_ids().is_empty();
        meta.in_generation_process = !complete;
        if complete {
            self.record_doc_version(&mut meta).await;
        }
        self.store.save(&hierarchy, &meta)?;

        let summary = RunSummary {
            added: prepared.added,
            updated: report.generated,
            failed: report.failed.len(),
            skipped: snapshot.skipped.len(),
            deleted: prepared.deleted,
            jobs: report.jobs_started,
            cancelled: report.cancelled,
            failures: report.failed,
            skipped_files: snapshot.skipped,
        };
        tracing::info!(
            added = summary.added,
            updated = summary.updated,
            failed = summary.failed,
            skipped = summary.skipped,
            deleted = summary.deleted,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Run complete"
        );
        Ok(summary)
    }

    /// Report what an update would regenerate, without writing anything.
    ///
    /// # Errors
    ///
    /// Returns the same fatal errors as [`scan_and_update`](Self::scan_and_update).
    pub async fn status(&self) -> Result<StatusReport> {
        let (mut hierarchy, mut meta) = self.store.load()?;
        let in_generation_process = meta.in_generation_process;
        let snapshot = self.snapshot().await?;
        let prepared = self.prepare(&mut hierarchy, &mut meta, &snapshot)?;

        let mut stale: Vec<StaleEntry> = hierarchy
            .entities()
            .filter(|e| e.is_stale())
            .map(|e| StaleEntry {
                qualified_path: e.qualified_path.clone(),
                kind: e.kind,
                status: e.status(),
                reason: e.stale_reason(),
            })
            .collect();
        stale.sort_by(|a, b| a.qualified_path.cmp(&b.qualified_path));

        let vcs_changes = match (&self.vcs, meta.doc_version.is_empty()) {
            (Some(vcs), false) => match vcs.changes_since(&meta.doc_version).await {
                Ok(changes) => Some(changes),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not list version-control changes");
                    None
                }
            },
            _ => None,
        };

        Ok(StatusReport {
            files: hierarchy.file_count(),
            entities: hierarchy.entity_count(),
            added_files: prepared.added_files,
            modified_files: prepared.modified_files,
            deleted_files: prepared.deleted_files,
            stale,
            skipped_files: snapshot.skipped,
            doc_version: meta.doc_version,
            in_generation_process,
            vcs_changes,
        })
    }

    /// Run an update now and again whenever a source file changes.
    ///
    /// Returns when the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns watcher setup errors and fatal run errors.
    pub async fn watch(&self) -> Result<()> {
        let mut watcher = FileWatcher::new(&self.config.repo_root, DEBOUNCE_DURATION)?;
        let settings = ScanSettings::from_config(&self.config);
        self.report(&self.scan_and_update().await?);

        loop {
            let batch = tokio::select! {
                () = self.cancel.cancelled() => break,
                batch = watcher.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };
            let rules = IgnoreRules::load(&self.config)?;
            if !batch.touches_sources(watcher.root(), &rules, &settings) {
                tracing::debug!(paths = batch.len(), "Ignoring non-source changes");
                continue;
            }
            tracing::info!(paths = batch.len(), "Source change detected");
            self.report(&self.scan_and_update().await?);
        }
        tracing::info!("Watch stopped");
        Ok(())
    }

    fn report(&self, summary: &RunSummary) {
        if summary.is_success() {
            tracing::info!(root = %self.config.repo_root.display(), "{}", summary.to_string().trim_end());
        } else {
            tracing::warn!(root = %self.config.repo_root.display(), "{}", summary.to_string().trim_end());
        }
    }

    /// Walk the tree and extract every candidate file off the async runtime.
    async fn snapshot(&self) -> Result<ScanSnapshot> {
        let rules = IgnoreRules::load(&self.config)?;
        let settings = ScanSettings::from_config(&self.config);
        let root = self.config.repo_root.clone();
        let registry = Arc::clone(&self.registry);

        tokio::task::spawn_blocking(move || -> Result<ScanSnapshot> {
            let result = scan(&root, &rules, &settings)?;
            let mut snapshot = ScanSnapshot::new();
            for path in &result.files {
                match registry.extract_file(&root, path) {
                    Ok(extraction) => snapshot.insert(extraction),
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "Skipping file");
                        snapshot.skip(path.clone(), e.to_string());
                    }
                }
            }
            let stats = result.stats;
            tracing::info!(
                files = stats.files_matched,
                skipped = snapshot.skipped.len(),
                "Scan complete"
            );
            Ok(snapshot)
        })
        .await
        .map_err(|e| Error::internal(format!("scan task failed: {e}")))?
    }

    /// Diff, apply, resolve and invalidate in place.
    fn prepare(
        &self,
        hierarchy: &mut Hierarchy,
        meta: &mut MetaInfo,
        snapshot: &ScanSnapshot,
    ) -> Result<Prepared> {
        let changes = diff(hierarchy, snapshot);
        let observed = !changes.is_empty();
        if observed {
            meta.run_sequence += 1;
        }
        let added_files = changes.added_files.len();
        let modified_files = changes.modified_files.len();
        let deleted_files = changes.deleted_files.len();

        let applied = changes.apply(hierarchy, snapshot, meta.run_sequence)?;
        let resolved = resolve(hierarchy, &applied.identifiers);

        let mut seeds = applied.direct_changes();
        seeds.extend(applied.orphaned_callers.iter().cloned());
        seeds.extend(resolved.changed);
        let stale = invalidate(&seeds, hierarchy, self.config.propagation_depth);

        let requeued = hierarchy.requeue_failed();

        if observed {
            let mut deleted: Vec<DeletedItem> = applied
                .vanished
                .iter()
                .map(|e| DeletedItem {
                    qualified_path: e.qualified_path.clone(),
                    kind: e.kind,
                })
                .collect();
            deleted.sort();
            for item in &deleted {
                tracing::info!(entity = %item.qualified_path, kind = %item.kind, "Entity removed");
            }
            meta.deleted_items_from_older_meta = deleted;
        }

        tracing::info!(
            added_files,
            modified_files,
            deleted_files,
            invalidated = stale.len(),
            requeued,
            "Hierarchy updated"
        );

        Ok(Prepared {
            added: applied.added.len(),
            deleted: applied.vanished.len(),
            added_files,
            modified_files,
            deleted_files,
        })
    }

    async fn record_doc_version(&self, meta: &mut MetaInfo) {
        let Some(vcs) = &self.vcs else {
            return;
        };
        match vcs.head().await {
            Ok(head) => meta.doc_version = head,
            Err(e) => tracing::warn!(error = %e, "Could not read version-control head"),
        }
    }
}
