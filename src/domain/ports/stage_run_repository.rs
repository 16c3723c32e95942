//! Stage run repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Artifact, RunLog, RunStatus, Stage, StageRun, StageTransitionEvent};

/// Persistence for runs and everything appended to them: logs, artifacts
/// and stage transition events.
///
/// Status changes go only through the conditional operations here
/// (`create_or_get_active`, `claim`, `complete`, `cancel`,
/// `fail_if_running`); there is no general update.
#[async_trait]
pub trait StageRunRepository: Send + Sync {
    /// Insert a queued run unless an active run exists for its
    /// (card, stage). Returns the stored run and whether it was inserted.
    async fn create_or_get_active(&self, run: &StageRun) -> DomainResult<(StageRun, bool)>;

    /// Load a run.
    async fn get(&self, id: Uuid) -> DomainResult<Option<StageRun>>;

    /// The queued or running run for (card, stage), if any.
    async fn find_active(&self, card_id: Uuid, stage: Stage) -> DomainResult<Option<StageRun>>;

    /// The most recent queued or running run for a card, any stage.
    async fn find_active_for_card(&self, card_id: Uuid) -> DomainResult<Option<StageRun>>;

    /// The newest run queued as a retry of `run_id`, if any.
    async fn find_retry_of(&self, run_id: Uuid) -> DomainResult<Option<StageRun>>;

    /// Run history for a card, newest first.
    async fn list_by_card(&self, card_id: Uuid) -> DomainResult<Vec<StageRun>>;

    /// Most recent runs in a workspace, newest first.
    async fn list_by_workspace(&self, workspace_id: Uuid, limit: usize) -> DomainResult<Vec<StageRun>>;

    /// Queued runs, oldest first.
    async fn list_queued(&self, workspace_id: Option<Uuid>, limit: usize) -> DomainResult<Vec<StageRun>>;

    /// Move queued → running for `worker_id`. False when no row was queued.
    async fn claim(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> DomainResult<bool>;

    /// Set a terminal status on an active run, merge `metadata_patch` into
    /// its metadata and clear heartbeats that point at it. False when the
    /// run was no longer active.
    async fn complete(
        &self,
        id: Uuid,
        status: RunStatus,
        error_summary: Option<&str>,
        metadata_patch: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> DomainResult<bool>;

    /// Running runs that started before `started_before`.
    async fn list_running_started_before(&self, started_before: DateTime<Utc>) -> DomainResult<Vec<StageRun>>;

    /// Force a running run to failed. False when it had already left `running`.
    async fn fail_if_running(&self, id: Uuid, error_summary: &str, now: DateTime<Utc>) -> DomainResult<bool>;

    /// Run counts per status.
    async fn count_by_status(&self, workspace_id: Option<Uuid>) -> DomainResult<HashMap<RunStatus, u64>>;

    /// Append a log line.
    async fn append_log(&self, log: &RunLog) -> DomainResult<()>;

    /// Log lines for a run in timestamp order.
    async fn list_logs(&self, run_id: Uuid) -> DomainResult<Vec<RunLog>>;

    /// Record an artifact.
    async fn insert_artifact(&self, artifact: &Artifact) -> DomainResult<()>;

    /// Artifacts of a run, oldest first.
    async fn list_artifacts(&self, run_id: Uuid) -> DomainResult<Vec<Artifact>>;

    /// Record a card transition.
    async fn insert_transition(&self, event: &StageTransitionEvent) -> DomainResult<()>;

    /// Transitions of a card, oldest first.
    async fn list_transitions(&self, card_id: Uuid) -> DomainResult<Vec<StageTransitionEvent>>;
}
