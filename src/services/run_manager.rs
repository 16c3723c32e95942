//! Run Manager: the only component that moves a stage run through its
//! lifecycle.
//!
//! Every status change is a conditional update in the store, so concurrent
//! workers coordinate through the database alone:
//! - `create_run` is idempotent per (card, stage) while a run is active
//! - `claim_run` is the sole admission into `running`
//! - `complete_run` and `cancel_run` never resurrect a terminal run
//! - `retry_run` inserts a new row and leaves the original untouched
//! - `rescue_stuck_runs` fails running runs no live heartbeat vouches for

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Artifact, AutomationLevel, Config, LogLevel, RunLog, RunStatus, Stage, StageRun,
    StageTransitionEvent, WorkerHeartbeat, WorkerStatus,
};
use crate::domain::ports::{StageRunRepository, WorkerRepository};

/// Error summary written by the rescue sweep.
pub const RESCUE_REASON: &str = "Run timed out or worker died";

/// Thresholds and limits the Run Manager enforces.
#[derive(Debug, Clone)]
pub struct RunManagerSettings {
    /// Highest attempt number `retry_run` may create
    pub max_attempts: u32,
    /// A heartbeat older than this is not live
    pub stale_worker: Duration,
    /// A running run started longer ago than this is a rescue candidate
    pub stuck_run: Duration,
    /// Provider recorded on runs created without one
    pub default_provider: String,
}

impl Default for RunManagerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunManagerSettings {
    /// Settings drawn from the retry, worker and provider sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry.max_attempts,
            stale_worker: secs(config.worker.stale_worker_secs),
            stuck_run: secs(config.worker.stuck_run_secs),
            default_provider: config.provider.default.clone(),
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

/// Parameters for a new run.
#[derive(Debug, Clone)]
pub struct CreateRunRequest {
    /// Card the run advances
    pub card_id: Uuid,
    /// Workspace the card belongs to
    pub workspace_id: Uuid,
    /// Stage to execute
    pub stage: Stage,
    /// Who asked for the run, free-form
    pub triggered_by: String,
    /// How much the run may do without approval
    pub automation_level: AutomationLevel,
    /// Provider override; the default provider when absent
    pub provider: Option<String>,
}

impl CreateRunRequest {
    /// An assisted request on the default provider.
    pub fn new(card_id: Uuid, workspace_id: Uuid, stage: Stage, triggered_by: impl Into<String>) -> Self {
        Self {
            card_id,
            workspace_id,
            stage,
            triggered_by: triggered_by.into(),
            automation_level: AutomationLevel::default(),
            provider: None,
        }
    }

    /// Sets the automation level.
    pub fn with_automation_level(mut self, level: AutomationLevel) -> Self {
        self.automation_level = level;
        self
    }

    /// Pins the run to a named provider.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// Owns run lifecycle: queueing, claims, status changes and rescue.
pub struct RunManager {
    runs: Arc<dyn StageRunRepository>,
    workers: Arc<dyn WorkerRepository>,
    settings: RunManagerSettings,
}

impl RunManager {
    /// A manager over the given stores.
    pub fn new(
        runs: Arc<dyn StageRunRepository>,
        workers: Arc<dyn WorkerRepository>,
        settings: RunManagerSettings,
    ) -> Self {
        Self { runs, workers, settings }
    }

    /// Current settings.
    pub fn settings(&self) -> &RunManagerSettings {
        &self.settings
    }

    // ----- lifecycle -----

    /// Queue a run, or return the active run for the same (card, stage).
    #[instrument(skip(self, request), fields(card_id = %request.card_id, stage = %request.stage))]
    pub async fn create_run(&self, request: CreateRunRequest) -> DomainResult<StageRun> {
        let provider = request
            .provider
            .unwrap_or_else(|| self.settings.default_provider.clone());
        let run = StageRun::new(request.card_id, request.workspace_id, request.stage, request.triggered_by)
            .with_automation_level(request.automation_level)
            .with_provider(provider);

        let (stored, inserted) = self.runs.create_or_get_active(&run).await?;
        if inserted {
            info!(run_id = %stored.id, "Run queued");
            self.append_log(stored.id, LogLevel::Info, "Run queued", None).await?;
        } else {
            debug!(run_id = %stored.id, status = %stored.status, "Active run already exists");
        }
        Ok(stored)
    }

    /// Atomically move a queued run to running. Exactly one caller wins.
    #[instrument(skip(self))]
    pub async fn claim_run(&self, run_id: Uuid, worker_id: &str) -> DomainResult<bool> {
        let claimed = self.runs.claim(run_id, worker_id, Utc::now()).await?;
        if claimed {
            self.append_log(run_id, LogLevel::Info, &format!("Claimed by worker {worker_id}"), None)
                .await?;
        } else {
            debug!(%run_id, worker_id, "Claim lost");
        }
        Ok(claimed)
    }

    /// Finish an active run. Returns false when the run had already ended,
    /// e.g. after a rescue or a cancel.
    #[instrument(skip(self, metadata_patch))]
    pub async fn complete_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_summary: Option<&str>,
        metadata_patch: Map<String, Value>,
    ) -> DomainResult<bool> {
        if !status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: "running".to_string(),
                to: status.to_string(),
                reason: "completion requires a terminal status".to_string(),
            });
        }

        let completed = self
            .runs
            .complete(run_id, status, error_summary, &metadata_patch, Utc::now())
            .await?;
        if !completed {
            warn!(%run_id, %status, "Completion ignored, run is no longer active");
            return Ok(false);
        }

        let (level, message) = match (status, error_summary) {
            (RunStatus::Succeeded, _) => (LogLevel::Info, "Run succeeded".to_string()),
            (_, Some(err)) => (LogLevel::Error, format!("Run {status}: {err}")),
            (_, None) => (LogLevel::Warn, format!("Run {status}")),
        };
        info!(%run_id, %status, "Run completed");
        self.append_log(run_id, level, &message, None).await?;
        Ok(true)
    }

    /// Cancel a queued or running run.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: Uuid, reason: &str) -> DomainResult<bool> {
        let run = self.get_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        self.complete_run(run_id, RunStatus::Cancelled, Some(reason), Map::new())
            .await
    }

    /// Queue the next attempt of a failed or cancelled run.
    ///
    /// When another run is already active for the card and stage, that run
    /// is returned instead. Only the newest attempt of a lineage can be
    /// retried, so attempt numbers stay unique and the cap holds.
    #[instrument(skip(self))]
    pub async fn retry_run(&self, run_id: Uuid, triggered_by: &str) -> DomainResult<StageRun> {
        let original = self.get_run(run_id).await?;
        if !original.status.is_retryable() {
            return Err(DomainError::InvalidStateTransition {
                from: original.status.to_string(),
                to: RunStatus::Queued.to_string(),
                reason: "only failed or cancelled runs can be retried".to_string(),
            });
        }
        if let Some(successor) = self.runs.find_retry_of(run_id).await? {
            if successor.status.is_terminal() {
                return Err(DomainError::AlreadyRetried {
                    run_id,
                    retry_id: successor.id,
                });
            }
            return Ok(successor);
        }
        if original.attempt >= self.settings.max_attempts {
            return Err(DomainError::MaxAttemptsExceeded {
                attempt: original.attempt,
                max_attempts: self.settings.max_attempts,
            });
        }

        let retry = StageRun::retry_of(&original, triggered_by);
        let (stored, inserted) = self.runs.create_or_get_active(&retry).await?;
        if inserted {
            info!(run_id = %stored.id, retry_of = %run_id, attempt = stored.attempt, "Retry queued");
            self.append_log(
                stored.id,
                LogLevel::Info,
                &format!("Retry of {run_id} queued (attempt {})", stored.attempt),
                None,
            )
            .await?;
        }
        Ok(stored)
    }

    // ----- queries -----

    /// The run, or `RunNotFound`.
    pub async fn get_run(&self, run_id: Uuid) -> DomainResult<StageRun> {
        self.runs
            .get(run_id)
            .await?
            .ok_or(DomainError::RunNotFound(run_id))
    }

    /// The run, if it exists.
    pub async fn find_run(&self, run_id: Uuid) -> DomainResult<Option<StageRun>> {
        self.runs.get(run_id).await
    }

    /// Every run of a card, newest first.
    pub async fn list_runs_for_card(&self, card_id: Uuid) -> DomainResult<Vec<StageRun>> {
        self.runs.list_by_card(card_id).await
    }

    /// Latest runs of a workspace, newest first.
    pub async fn list_recent_runs(&self, workspace_id: Uuid, limit: usize) -> DomainResult<Vec<StageRun>> {
        self.runs.list_by_workspace(workspace_id, limit).await
    }

    /// Queued runs in claim order.
    pub async fn list_queued_runs(&self, workspace_id: Option<Uuid>, limit: usize) -> DomainResult<Vec<StageRun>> {
        self.runs.list_queued(workspace_id, limit).await
    }

    /// Active run for a card, optionally for one stage.
    pub async fn get_active_run(&self, card_id: Uuid, stage: Option<Stage>) -> DomainResult<Option<StageRun>> {
        match stage {
            Some(stage) => self.runs.find_active(card_id, stage).await,
            None => self.runs.find_active_for_card(card_id).await,
        }
    }

    /// Run counts per status.
    pub async fn count_by_status(&self, workspace_id: Option<Uuid>) -> DomainResult<HashMap<RunStatus, u64>> {
        self.runs.count_by_status(workspace_id).await
    }

    // ----- logs, artifacts, transitions -----

    /// Appends a log line to a run. Log failures are reported, not fatal.
    pub async fn append_log(
        &self,
        run_id: Uuid,
        level: LogLevel,
        message: &str,
        step_key: Option<&str>,
    ) -> DomainResult<()> {
        let mut log = RunLog::new(run_id, level, message);
        if let Some(step) = step_key {
            log = log.with_step(step);
        }
        self.runs.append_log(&log).await
    }

    /// Log lines of a run, oldest first.
    pub async fn list_logs(&self, run_id: Uuid) -> DomainResult<Vec<RunLog>> {
        self.runs.list_logs(run_id).await
    }

    /// Stores an artifact produced by a run.
    pub async fn record_artifact(&self, artifact: &Artifact) -> DomainResult<()> {
        self.runs.insert_artifact(artifact).await
    }

    /// Artifacts of a run.
    pub async fn list_artifacts(&self, run_id: Uuid) -> DomainResult<Vec<Artifact>> {
        self.runs.list_artifacts(run_id).await
    }

    /// Records a card moving between stages.
    pub async fn record_transition(&self, event: &StageTransitionEvent) -> DomainResult<()> {
        self.runs.insert_transition(event).await
    }

    /// Stage transitions of a card, oldest first.
    pub async fn list_transitions(&self, card_id: Uuid) -> DomainResult<Vec<StageTransitionEvent>> {
        self.runs.list_transitions(card_id).await
    }

    // ----- rescue -----

    /// Fail running runs older than the stuck threshold that no live worker
    /// vouches for. Returns the rescued run ids.
    #[instrument(skip(self))]
    pub async fn rescue_stuck_runs(&self) -> DomainResult<Vec<Uuid>> {
        let rescued = self.sweep(Utc::now()).await?;
        Ok(rescued.into_iter().map(|run| run.id).collect())
    }

    /// The same sweep reported per card: ids of cards that had a stage
    /// locked by a dead run and are now free.
    #[instrument(skip(self))]
    pub async fn unlock_stuck_cards(&self) -> DomainResult<Vec<Uuid>> {
        let rescued = self.sweep(Utc::now()).await?;
        let cards: BTreeSet<Uuid> = rescued.into_iter().map(|run| run.card_id).collect();
        for card_id in &cards {
            info!(%card_id, "Card unlocked");
        }
        Ok(cards.into_iter().collect())
    }

    /// One sweep, returning the rescued runs themselves.
    #[instrument(skip(self))]
    pub async fn rescue_stuck(&self) -> DomainResult<Vec<StageRun>> {
        self.sweep(Utc::now()).await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> DomainResult<Vec<StageRun>> {
        let candidates = self
            .runs
            .list_running_started_before(now - self.settings.stuck_run)
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let live = self.workers.list_live(now - self.settings.stale_worker, None).await?;
        let mut rescued = Vec::new();
        for run in candidates {
            if is_corroborated(&run, &live) {
                debug!(run_id = %run.id, "Stuck candidate still has a live worker");
                continue;
            }
            if self.runs.fail_if_running(run.id, RESCUE_REASON, now).await? {
                warn!(run_id = %run.id, card_id = %run.card_id, stage = %run.stage, "Rescued stuck run");
                self.append_log(run.id, LogLevel::Error, RESCUE_REASON, None).await?;
                rescued.push(run);
            }
        }
        Ok(rescued)
    }

    // ----- worker bookkeeping -----

    /// Upsert an idle heartbeat for a starting worker.
    pub async fn register_worker(&self, worker_id: &str, workspace_id: Option<Uuid>) -> DomainResult<WorkerHeartbeat> {
        let heartbeat = WorkerHeartbeat::new(worker_id, workspace_id);
        self.workers.upsert(&heartbeat).await?;
        info!(worker_id, "Worker registered");
        Ok(heartbeat)
    }

    /// Refresh a worker's heartbeat, recreating the row if cleanup removed it.
    pub async fn update_worker_heartbeat(
        &self,
        worker_id: &str,
        workspace_id: Option<Uuid>,
        status: WorkerStatus,
        active_run_id: Option<Uuid>,
    ) -> DomainResult<()> {
        if self
            .workers
            .touch(worker_id, status, active_run_id, Utc::now())
            .await?
        {
            return Ok(());
        }
        warn!(worker_id, "Heartbeat row missing, re-registering");
        let mut heartbeat = WorkerHeartbeat::new(worker_id, workspace_id);
        heartbeat.status = status;
        heartbeat.active_run_id = active_run_id;
        self.workers.upsert(&heartbeat).await
    }

    /// Bumps a worker's processed or failed counter.
    pub async fn increment_worker_stats(&self, worker_id: &str, failed: bool) -> DomainResult<()> {
        self.workers.increment_stats(worker_id, failed).await
    }

    /// Workers with a heartbeat newer than the staleness threshold.
    pub async fn get_active_workers(&self, workspace_id: Option<Uuid>) -> DomainResult<Vec<WorkerHeartbeat>> {
        self.workers
            .list_live(Utc::now() - self.settings.stale_worker, workspace_id)
            .await
    }

    /// Whether any worker heartbeat is still fresh.
    pub async fn has_active_workers(&self, workspace_id: Option<Uuid>) -> DomainResult<bool> {
        Ok(!self.get_active_workers(workspace_id).await?.is_empty())
    }

    /// Every registered worker heartbeat.
    pub async fn list_workers(&self) -> DomainResult<Vec<WorkerHeartbeat>> {
        self.workers.list_all().await
    }

    /// Delete heartbeats stale beyond twice the threshold. Rows still
    /// pointing at a run are kept as rescue evidence.
    #[instrument(skip(self))]
    pub async fn cleanup_stale_workers(&self) -> DomainResult<u64> {
        let cutoff = Utc::now() - self.settings.stale_worker * 2;
        let removed = self.workers.delete_stale(cutoff).await?;
        if removed > 0 {
            info!(removed, "Removed stale worker heartbeats");
        }
        Ok(removed)
    }
}

/// A live worker vouches for a run if it advertises the run or claimed it.
fn is_corroborated(run: &StageRun, live: &[WorkerHeartbeat]) -> bool {
    live.iter().any(|hb| {
        hb.active_run_id == Some(run.id) || run.claimed_by.as_deref() == Some(hb.worker_id.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(claimed_by: &str) -> StageRun {
        let mut run = StageRun::new(Uuid::new_v4(), Uuid::new_v4(), Stage::Prd, "test");
        run.status = RunStatus::Running;
        run.claimed_by = Some(claimed_by.to_string());
        run
    }

    #[test]
    fn test_corroboration_by_active_run_or_claimer() {
        let run = running("worker-a");

        let mut advertising = WorkerHeartbeat::new("worker-b", None);
        advertising.active_run_id = Some(run.id);
        assert!(is_corroborated(&run, &[advertising]));

        let claimer = WorkerHeartbeat::new("worker-a", None);
        assert!(is_corroborated(&run, &[claimer]));

        let stranger = WorkerHeartbeat::new("worker-c", None);
        assert!(!is_corroborated(&run, &[stranger]));
        assert!(!is_corroborated(&run, &[]));
    }

    #[test]
    fn test_settings_from_config() {
        let settings = RunManagerSettings::default();
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.stale_worker, Duration::seconds(60));
        assert_eq!(settings.stuck_run, Duration::seconds(300));
        assert_eq!(settings.default_provider, "anthropic-api");
    }
}
