//! Operational surface: health, manual rescue and heartbeat cleanup.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{RunStatus, WorkerHeartbeat};

use super::run_manager::RunManager;

/// Snapshot of the engine as seen from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Workers with a fresh heartbeat
    pub active_workers: usize,
    /// Runs waiting to be claimed
    pub queued_runs: u64,
    /// Runs claimed and executing
    pub running_runs: u64,
    /// Runs are waiting but no worker is alive to take them
    pub stalled: bool,
}

/// What a manual rescue did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RescueReport {
    /// Runs moved back to the queue or failed
    pub rescued_runs: Vec<Uuid>,
    /// Cards whose stage lock was released
    pub unlocked_cards: Vec<Uuid>,
}

/// Maintenance entry points behind the `ops` commands.
pub struct EngineOperations {
    runs: Arc<RunManager>,
}

impl EngineOperations {
    /// Operations backed by `runs`.
    pub fn new(runs: Arc<RunManager>) -> Self {
        Self { runs }
    }

    /// Counts live workers and open runs, optionally for one workspace.
    pub async fn health(&self, workspace_id: Option<Uuid>) -> DomainResult<HealthReport> {
        let active_workers = self.runs.get_active_workers(workspace_id).await?.len();
        let counts = self.runs.count_by_status(workspace_id).await?;
        let queued_runs = counts.get(&RunStatus::Queued).copied().unwrap_or(0);
        let running_runs = counts.get(&RunStatus::Running).copied().unwrap_or(0);
        let stalled = queued_runs > 0 && active_workers == 0;
        if stalled {
            warn!(queued_runs, "Runs are queued but no worker is active");
        }
        Ok(HealthReport {
            active_workers,
            queued_runs,
            running_runs,
            stalled,
        })
    }

    /// Force the stuck-run sweep and report the cards it released.
    pub async fn rescue(&self) -> DomainResult<RescueReport> {
        let rescued = self.runs.rescue_stuck().await?;
        let unlocked_cards: BTreeSet<Uuid> = rescued.iter().map(|run| run.card_id).collect();
        let rescued_runs: Vec<Uuid> = rescued.iter().map(|run| run.id).collect();
        info!(
            rescued = rescued_runs.len(),
            unlocked = unlocked_cards.len(),
            "Manual rescue finished"
        );
        Ok(RescueReport {
            rescued_runs,
            unlocked_cards: unlocked_cards.into_iter().collect(),
        })
    }

    /// Deletes stale worker heartbeats. Returns how many were removed.
    pub async fn cleanup(&self) -> DomainResult<u64> {
        self.runs.cleanup_stale_workers().await
    }

    /// Every registered worker heartbeat.
    pub async fn workers(&self) -> DomainResult<Vec<WorkerHeartbeat>> {
        self.runs.list_workers().await
    }
}
