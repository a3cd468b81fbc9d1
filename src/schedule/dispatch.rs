//! Bounded-concurrency dispatch of generation jobs.
//!
//! The dispatcher owns the only mutable borrow of the hierarchy for the
//! duration of a run: readiness checks, status transitions and write-back of
//! generated text all happen on the dispatch loop, while workers only hold
//! an immutable [`PromptContext`] snapshot and await the backend.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::plan::DispatchPlan;
use crate::error::GenerationError;
use crate::generation::{Generator, PromptContext};
use crate::hierarchy::{EntityId, Hierarchy};
use crate::{Config, Result};

/// Upper bound on the exponential backoff multiplier.
const MAX_BACKOFF_SHIFT: u32 = 6;

/// Dispatch tuning.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Maximum number of jobs in flight.
    pub concurrency: usize,
    /// Per-attempt timeout.
    pub job_timeout: Duration,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Base delay between attempts, doubled per retry.
    pub backoff_base: Duration,
    /// Checkpoint after this many completions (0 disables).
    pub checkpoint_every: usize,
    /// Documentation revisions retained per entity.
    pub max_doc_revisions: usize,
    /// Output language passed into prompts.
    pub doc_language: String,
}

impl DispatchSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.max_workers,
            job_timeout: config.job_timeout(),
            max_retries: config.max_retries,
            backoff_base: config.retry_backoff(),
            checkpoint_every: config.checkpoint_every,
            max_doc_revisions: config.max_doc_revisions,
            doc_language: config.doc_language.clone(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// An entity that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntity {
    pub id: EntityId,
    pub qualified_path: String,
    pub error: GenerationError,
    pub attempts: u32,
}

/// Outcome of one dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Entities that received new documentation.
    pub generated: usize,
    /// Entities marked failed this run.
    pub failed: Vec<FailedEntity>,
    /// Whether the run stopped on the abort signal.
    pub cancelled: bool,
    /// Jobs submitted to the pool.
    pub jobs_started: usize,
    /// Planned entities that were no longer pending when they became ready.
    pub skipped: usize,
}

struct JobOutcome {
    id: EntityId,
    result: std::result::Result<String, GenerationError>,
    attempts: u32,
}

/// Readiness bookkeeping over a plan.
///
/// Prompts are built when a unit is released, so cycle-mates all see each
/// other's documentation as it stood before the unit started.
struct Tracker<'p> {
    plan: &'p DispatchPlan,
    language: &'p str,
    remaining_deps: Vec<usize>,
    open_members: Vec<usize>,
    ready: VecDeque<EntityId>,
    queued: HashSet<EntityId>,
    in_flight: HashSet<EntityId>,
    prompts: HashMap<EntityId, PromptContext>,
}

impl<'p> Tracker<'p> {
    fn new(plan: &'p DispatchPlan, hierarchy: &Hierarchy, language: &'p str) -> Self {
        let mut tracker = Self {
            plan,
            language,
            remaining_deps: plan.units().iter().map(|u| u.depends_on.len()).collect(),
            open_members: plan.units().iter().map(|u| u.members.len()).collect(),
            ready: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            prompts: HashMap::new(),
        };
        for unit in plan.units() {
            if unit.depends_on.is_empty() {
                tracker.release(unit.index, hierarchy);
            }
        }
        tracker
    }

    /// Queue every member of a unit, once, with its prompt snapshot.
    fn release(&mut self, unit: usize, hierarchy: &Hierarchy) {
        let plan = self.plan;
        for id in &plan.units()[unit].members {
            if self.in_flight.contains(id) || !self.queued.insert(id.clone()) {
                continue;
            }
            if let Some(entity) = hierarchy.entity(id) {
                self.prompts.insert(
                    id.clone(),
                    PromptContext::from_entity(hierarchy, entity, self.language),
                );
            }
            self.ready.push_back(id.clone());
        }
    }

    /// Record a terminal member; unblocks dependents once its unit closes.
    fn finish(&mut self, id: &str, hierarchy: &Hierarchy) {
        self.in_flight.remove(id);
        let Some(unit) = self.plan.unit_of(id) else {
            return;
        };
        self.open_members[unit] = self.open_members[unit].saturating_sub(1);
        if self.open_members[unit] > 0 {
            return;
        }
        let plan = self.plan;
        for &dependent in &plan.units()[unit].dependents {
            self.remaining_deps[dependent] = self.remaining_deps[dependent].saturating_sub(1);
            if self.remaining_deps[dependent] == 0 {
                self.release(dependent, hierarchy);
            }
        }
    }
}

/// Drives a [`DispatchPlan`] to completion against a [`Generator`].
pub struct Dispatcher {
    generator: Arc<dyn Generator>,
    settings: DispatchSettings,
    cancel: CancellationToken,
}

impl Dispatcher {
    #[must_use]
    pub fn new(generator: Arc<dyn Generator>, settings: DispatchSettings) -> Self {
        Self {
            generator,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned abort signal.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Generate documentation for every entity in `plan`.
    ///
    /// `checkpoint` is called with the hierarchy every
    /// `checkpoint_every` completions. On cancellation no new jobs start,
    /// finished results are still applied and every `in_progress` entity is
    /// reverted to `pending` before returning.
    ///
    /// # Errors
    ///
    /// Returns the checkpoint's error; in-flight jobs are aborted and
    /// reverted first.
    pub async fn run(
        &self,
        hierarchy: &mut Hierarchy,
        plan: &DispatchPlan,
        checkpoint: &mut (dyn FnMut(&Hierarchy) -> Result<()> + Send),
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        if plan.is_empty() {
            return Ok(report);
        }

        tracing::info!(
            entities = plan.entity_count(),
            units = plan.len(),
            cycles = plan.cycle_count(),
            concurrency = self.settings.concurrency,
            generator = self.generator.name(),
            "Dispatching generation jobs"
        );

        let concurrency = self.settings.concurrency.max(1);
        let mut tracker = Tracker::new(plan, hierarchy, &self.settings.doc_language);
        let mut jobs: JoinSet<JobOutcome> = JoinSet::new();
        let mut since_checkpoint = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            while tracker.in_flight.len() < concurrency {
                let Some(id) = tracker.ready.pop_front() else {
                    break;
                };
                tracker.queued.remove(&id);
                let prompt = tracker.prompts.remove(&id);
                if !hierarchy.mark_in_progress(&id) {
                    report.skipped += 1;
                    tracker.finish(&id, hierarchy);
                    continue;
                }
                let Some(ctx) = prompt else {
                    tracker.finish(&id, hierarchy);
                    continue;
                };
                tracing::debug!(entity = %ctx.qualified_path, callees = ctx.callees.len(), "Starting job");
                tracker.in_flight.insert(id.clone());
                report.jobs_started += 1;
                jobs.spawn(run_job(
                    Arc::clone(&self.generator),
                    id,
                    ctx,
                    self.settings.clone(),
                    self.cancel.child_token(),
                ));
            }

            if jobs.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                joined = jobs.join_next() => joined,
            };

            match joined {
                Some(Ok(outcome)) => {
                    let id = outcome.id.clone();
                    self.apply(hierarchy, &mut report, outcome);
                    tracker.finish(&id, hierarchy);
                    since_checkpoint += 1;
                }
                // Jobs catch their own panics, so this is only an aborted task.
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Generation task did not complete");
                }
                None => break,
            }

            if self.settings.checkpoint_every > 0 && since_checkpoint >= self.settings.checkpoint_every {
                since_checkpoint = 0;
                if let Err(e) = checkpoint(hierarchy) {
                    jobs.abort_all();
                    while jobs.join_next().await.is_some() {}
                    hierarchy.revert_in_progress();
                    return Err(e);
                }
            }
        }

        if report.cancelled {
            jobs.abort_all();
            while let Some(joined) = jobs.join_next().await {
                if let Ok(outcome) = joined {
                    self.apply(hierarchy, &mut report, outcome);
                }
            }
        }

        let reverted = hierarchy.revert_in_progress();
        if report.cancelled {
            tracing::warn!(
                generated = report.generated,
                reverted,
                "Dispatch cancelled, unfinished entities left pending"
            );
        } else {
            tracing::info!(
                generated = report.generated,
                failed = report.failed.len(),
                skipped = report.skipped,
                "Dispatch complete"
            );
        }
        Ok(report)
    }

    fn apply(&self, hierarchy: &mut Hierarchy, report: &mut DispatchReport, outcome: JobOutcome) {
        let JobOutcome {
            id,
            result,
            attempts,
        } = outcome;
        let qualified_path = hierarchy
            .entity(&id)
            .map(|e| e.qualified_path.clone())
            .unwrap_or_default();

        match result {
            Ok(text) => {
                if hierarchy.complete(&id, text, self.settings.max_doc_revisions) {
                    report.generated += 1;
                    tracing::debug!(entity = %qualified_path, attempts, "Generated documentation");
                }
            }
            Err(GenerationError::Cancelled) => {
                tracing::debug!(entity = %qualified_path, "Job cancelled");
            }
            Err(error) => {
                if hierarchy.fail(&id) {
                    tracing::error!(entity = %qualified_path, attempts, error = %error, "Generation failed");
                    report.failed.push(FailedEntity {
                        id,
                        qualified_path,
                        error,
                        attempts,
                    });
                }
            }
        }
    }
}

async fn run_job(
    generator: Arc<dyn Generator>,
    id: EntityId,
    ctx: PromptContext,
    settings: DispatchSettings,
    cancel: CancellationToken,
) -> JobOutcome {
    let attempt = AssertUnwindSafe(attempt_loop(generator.as_ref(), &ctx, &settings, &cancel))
        .catch_unwind()
        .await;
    let (result, attempts) = attempt.unwrap_or_else(|_| {
        (
            Err(GenerationError::Backend("generator panicked".to_string())),
            1,
        )
    });
    JobOutcome {
        id,
        result,
        attempts,
    }
}

async fn attempt_loop(
    generator: &dyn Generator,
    ctx: &PromptContext,
    settings: &DispatchSettings,
    cancel: &CancellationToken,
) -> (std::result::Result<String, GenerationError>, u32) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(settings.job_timeout, generator.generate(ctx)).await {
            Ok(Ok(text)) if text.trim().is_empty() => Err(GenerationError::EmptyResponse),
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout {
                secs: settings.job_timeout.as_secs(),
            }),
        };

        match result {
            Ok(text) => return (Ok(text), attempt),
            Err(error) if error.is_transient() && attempt <= settings.max_retries => {
                let delay = backoff_delay(settings.backoff_base, attempt);
                tracing::warn!(
                    entity = %ctx.qualified_path,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Generation attempt failed, retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => return (Err(GenerationError::Cancelled), attempt),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(error) => return (Err(error), attempt),
        }
    }
}

/// Exponential backoff with up to 50% random jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    let delay = base.saturating_mul(1u32 << shift);
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
    delay.saturating_add(Duration::from_millis(jitter))
}
