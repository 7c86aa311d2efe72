//! Run Record - one training execution

use crate::trainer::ModelId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Created, not yet started.
    Pending,
    /// Training in progress.
    Running,
    /// Artifacts written.
    Success,
    /// Training or persistence failed.
    Failed,
}

/// One training execution of a model.
///
/// A run moves `Pending -> Running -> Success | Failed`; timestamps are
/// set on the transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    run_id: String,
    model_id: ModelId,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl RunRecord {
    /// New pending run with a fresh id (`<model>-<utc timestamp>-<seq>`).
    #[must_use]
    pub fn new(model_id: ModelId) -> Self {
        let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
        let run_id = format!("{model_id}-{}-{seq}", Utc::now().format("%Y%m%dT%H%M%S%.6fZ"));
        Self::with_id(run_id, model_id)
    }

    /// New pending run with a caller-chosen id.
    #[must_use]
    pub fn with_id(run_id: impl Into<String>, model_id: ModelId) -> Self {
        Self {
            run_id: run_id.into(),
            model_id,
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    /// Run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Model trained by this run.
    #[must_use]
    pub const fn model_id(&self) -> ModelId {
        self.model_id
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// End timestamp.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Failure message of a failed run.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Mark as running.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark as succeeded.
    pub fn succeed(&mut self) {
        self.status = RunStatus::Success;
        self.ended_at = Some(Utc::now());
    }

    /// Mark as failed with a message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
    }
}

/// Finished runs kept per model by [`RunLog::new`].
pub const DEFAULT_RUNS_PER_MODEL: usize = 32;

/// In-memory log of runs, shared across threads.
///
/// At most `runs_per_model` finished runs are kept for each model; older
/// ones are dropped on insert. Pending and running runs are never dropped,
/// and neither is the latest successful run of a model.
#[derive(Debug)]
pub struct RunLog {
    runs: DashMap<String, RunRecord>,
    runs_per_model: usize,
}

impl Default for RunLog {
    fn default() -> Self {
        Self::with_limit(DEFAULT_RUNS_PER_MODEL)
    }
}

impl RunLog {
    /// Empty log keeping [`DEFAULT_RUNS_PER_MODEL`] finished runs per model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty log keeping `runs_per_model` finished runs per model (at least one).
    #[must_use]
    pub fn with_limit(runs_per_model: usize) -> Self {
        Self {
            runs: DashMap::new(),
            runs_per_model: runs_per_model.max(1),
        }
    }

    /// Finished runs kept per model.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.runs_per_model
    }

    /// Insert or replace a run, then drop the oldest finished runs of its
    /// model beyond the limit.
    pub fn record(&self, run: RunRecord) {
        let model_id = run.model_id();
        self.runs.insert(run.run_id().to_string(), run);
        self.prune(model_id);
    }

    fn prune(&self, model_id: ModelId) {
        let runs = self.runs_for(model_id);
        let keep = runs
            .iter()
            .rev()
            .find(|r| r.status() == RunStatus::Success)
            .map(|r| r.run_id.clone());
        let finished: Vec<&RunRecord> = runs
            .iter()
            .filter(|r| matches!(r.status(), RunStatus::Success | RunStatus::Failed))
            .collect();
        let excess = finished.len().saturating_sub(self.runs_per_model);
        let mut dropped = 0;
        for run in finished {
            if dropped == excess {
                break;
            }
            if keep.as_deref() == Some(run.run_id()) {
                continue;
            }
            self.runs.remove(run.run_id());
            dropped += 1;
        }
        if dropped > 0 {
            debug!(model = %model_id, dropped, "pruned run log");
        }
    }

    /// Run by id.
    #[must_use]
    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.get(run_id).map(|r| r.value().clone())
    }

    /// Runs of one model, oldest first.
    #[must_use]
    pub fn runs_for(&self, model_id: ModelId) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self
            .runs
            .iter()
            .filter(|r| r.model_id() == model_id)
            .map(|r| r.value().clone())
            .collect();
        runs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        runs
    }

    /// Most recent successful run of a model.
    #[must_use]
    pub fn latest_success(&self, model_id: ModelId) -> Option<RunRecord> {
        self.runs_for(model_id)
            .into_iter()
            .rev()
            .find(|r| r.status() == RunStatus::Success)
    }

    /// Number of runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// True when no run was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
