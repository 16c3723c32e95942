//! Worker heartbeat repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{WorkerHeartbeat, WorkerStatus};

/// Worker heartbeat rows.
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    /// Insert or replace the row for `heartbeat.worker_id`.
    async fn upsert(&self, heartbeat: &WorkerHeartbeat) -> DomainResult<()>;

    /// One heartbeat row.
    async fn get(&self, worker_id: &str) -> DomainResult<Option<WorkerHeartbeat>>;

    /// Refresh `last_heartbeat` and report status. False when the row is gone.
    async fn touch(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        active_run_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> DomainResult<bool>;

    /// Bump the processed or failed counter.
    async fn increment_stats(&self, worker_id: &str, failed: bool) -> DomainResult<()>;

    /// Rows with `last_heartbeat >= since`, optionally scoped to a workspace.
    async fn list_live(&self, since: DateTime<Utc>, workspace_id: Option<Uuid>) -> DomainResult<Vec<WorkerHeartbeat>>;

    /// Every heartbeat row, fresh or not.
    async fn list_all(&self) -> DomainResult<Vec<WorkerHeartbeat>>;

    /// Delete rows older than `before` that hold no active run.
    async fn delete_stale(&self, before: DateTime<Utc>) -> DomainResult<u64>;
}
