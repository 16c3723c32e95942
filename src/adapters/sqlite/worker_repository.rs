//! SQLite implementation of the WorkerRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_optional_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{WorkerHeartbeat, WorkerStatus};
use crate::domain::ports::WorkerRepository;

/// SQLite worker heartbeats.
#[derive(Clone)]
pub struct SqliteWorkerRepository {
    pool: SqlitePool,
}

impl SqliteWorkerRepository {
    /// Repository on `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerRepository for SqliteWorkerRepository {
    async fn upsert(&self, heartbeat: &WorkerHeartbeat) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO worker_heartbeats (worker_id, workspace_id, last_heartbeat, status,
               active_run_id, processed_count, failed_count, started_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(worker_id) DO UPDATE SET
                   workspace_id = excluded.workspace_id,
                   last_heartbeat = excluded.last_heartbeat,
                   status = excluded.status,
                   active_run_id = excluded.active_run_id,
                   processed_count = excluded.processed_count,
                   failed_count = excluded.failed_count,
                   started_at = excluded.started_at"#,
        )
        .bind(&heartbeat.worker_id)
        .bind(heartbeat.workspace_id.map(|id| id.to_string()))
        .bind(format_datetime(heartbeat.last_heartbeat))
        .bind(heartbeat.status.as_str())
        .bind(heartbeat.active_run_id.map(|id| id.to_string()))
        .bind(heartbeat.processed_count as i64)
        .bind(heartbeat.failed_count as i64)
        .bind(format_datetime(heartbeat.started_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, worker_id: &str) -> DomainResult<Option<WorkerHeartbeat>> {
        let row: Option<HeartbeatRow> =
            sqlx::query_as("SELECT * FROM worker_heartbeats WHERE worker_id = ?")
                .bind(worker_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn touch(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        active_run_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE worker_heartbeats SET last_heartbeat = ?, status = ?, active_run_id = ?
               WHERE worker_id = ?"#,
        )
        .bind(format_datetime(now))
        .bind(status.as_str())
        .bind(active_run_id.map(|id| id.to_string()))
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment_stats(&self, worker_id: &str, failed: bool) -> DomainResult<()> {
        let sql = if failed {
            "UPDATE worker_heartbeats SET failed_count = failed_count + 1 WHERE worker_id = ?"
        } else {
            "UPDATE worker_heartbeats SET processed_count = processed_count + 1 WHERE worker_id = ?"
        };
        sqlx::query(sql).bind(worker_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_live(&self, since: DateTime<Utc>, workspace_id: Option<Uuid>) -> DomainResult<Vec<WorkerHeartbeat>> {
        let workspace = workspace_id.map(|id| id.to_string());
        let rows: Vec<HeartbeatRow> = sqlx::query_as(
            r#"SELECT * FROM worker_heartbeats
               WHERE last_heartbeat >= ? AND (? IS NULL OR workspace_id IS NULL OR workspace_id = ?)
               ORDER BY last_heartbeat DESC"#,
        )
        .bind(format_datetime(since))
        .bind(&workspace)
        .bind(&workspace)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_all(&self) -> DomainResult<Vec<WorkerHeartbeat>> {
        let rows: Vec<HeartbeatRow> =
            sqlx::query_as("SELECT * FROM worker_heartbeats ORDER BY started_at ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete_stale(&self, before: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query(
            "DELETE FROM worker_heartbeats WHERE last_heartbeat < ? AND active_run_id IS NULL",
        )
        .bind(format_datetime(before))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct HeartbeatRow {
    worker_id: String,
    workspace_id: Option<String>,
    last_heartbeat: String,
    status: String,
    active_run_id: Option<String>,
    processed_count: i64,
    failed_count: i64,
    started_at: String,
}

impl TryFrom<HeartbeatRow> for WorkerHeartbeat {
    type Error = DomainError;

    fn try_from(row: HeartbeatRow) -> Result<Self, Self::Error> {
        Ok(WorkerHeartbeat {
            worker_id: row.worker_id,
            workspace_id: parse_optional_uuid(row.workspace_id)?,
            last_heartbeat: parse_datetime(&row.last_heartbeat)?,
            status: WorkerStatus::from_str(&row.status).unwrap_or_default(),
            active_run_id: parse_optional_uuid(row.active_run_id)?,
            processed_count: row.processed_count.max(0) as u64,
            failed_count: row.failed_count.max(0) as u64,
            started_at: parse_datetime(&row.started_at)?,
        })
    }
}
