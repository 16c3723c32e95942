//! SQLite implementation of the StageRunRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    format_datetime, parse_datetime, parse_json_or_default, parse_optional_datetime,
    parse_optional_uuid, parse_uuid,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Artifact, AutomationLevel, LogLevel, RunLog, RunStatus, Stage, StageRun, StageTransitionEvent,
};
use crate::domain::ports::StageRunRepository;

/// SQLite runs, logs, artifacts and transitions.
#[derive(Clone)]
pub struct SqliteStageRunRepository {
    pool: SqlitePool,
}

impl SqliteStageRunRepository {
    /// Repository on `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_ignoring_conflict(&self, run: &StageRun) -> DomainResult<bool> {
        let metadata_json = serde_json::to_string(&run.metadata)?;
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO stage_runs (id, card_id, workspace_id, stage, status,
               automation_level, provider, attempt, idempotency_key, triggered_by, claimed_by,
               error_summary, metadata, created_at, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.card_id.to_string())
        .bind(run.workspace_id.to_string())
        .bind(run.stage.as_str())
        .bind(run.status.as_str())
        .bind(run.automation_level.as_str())
        .bind(&run.provider)
        .bind(i64::from(run.attempt))
        .bind(&run.idempotency_key)
        .bind(&run.triggered_by)
        .bind(&run.claimed_by)
        .bind(&run.error_summary)
        .bind(&metadata_json)
        .bind(format_datetime(run.created_at))
        .bind(run.started_at.map(format_datetime))
        .bind(run.finished_at.map(format_datetime))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl StageRunRepository for SqliteStageRunRepository {
    async fn create_or_get_active(&self, run: &StageRun) -> DomainResult<(StageRun, bool)> {
        // The partial unique index rejects a second active run for the same
        // (card, stage). An active run that finishes between the rejected
        // insert and the lookup makes the lookup miss, so go around again.
        for _ in 0..3 {
            if self.insert_ignoring_conflict(run).await? {
                return Ok((run.clone(), true));
            }
            if let Some(existing) = self.find_active(run.card_id, run.stage).await? {
                return Ok((existing, false));
            }
        }
        Err(DomainError::DatabaseError(format!(
            "could not insert run for card {} stage {} (idempotency key {})",
            run.card_id, run.stage, run.idempotency_key
        )))
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<StageRun>> {
        let row: Option<StageRunRow> = sqlx::query_as("SELECT * FROM stage_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_active(&self, card_id: Uuid, stage: Stage) -> DomainResult<Option<StageRun>> {
        let row: Option<StageRunRow> = sqlx::query_as(
            "SELECT * FROM stage_runs WHERE card_id = ? AND stage = ? AND status IN ('queued', 'running')",
        )
        .bind(card_id.to_string())
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_active_for_card(&self, card_id: Uuid) -> DomainResult<Option<StageRun>> {
        let row: Option<StageRunRow> = sqlx::query_as(
            r#"SELECT * FROM stage_runs WHERE card_id = ? AND status IN ('queued', 'running')
               ORDER BY created_at DESC LIMIT 1"#,
        )
        .bind(card_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_retry_of(&self, run_id: Uuid) -> DomainResult<Option<StageRun>> {
        let row: Option<StageRunRow> = sqlx::query_as(
            r#"SELECT * FROM stage_runs WHERE json_extract(metadata, '$.retryOf') = ?
               ORDER BY created_at DESC LIMIT 1"#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_card(&self, card_id: Uuid) -> DomainResult<Vec<StageRun>> {
        let rows: Vec<StageRunRow> =
            sqlx::query_as("SELECT * FROM stage_runs WHERE card_id = ? ORDER BY created_at DESC")
                .bind(card_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_by_workspace(&self, workspace_id: Uuid, limit: usize) -> DomainResult<Vec<StageRun>> {
        let rows: Vec<StageRunRow> = sqlx::query_as(
            "SELECT * FROM stage_runs WHERE workspace_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(workspace_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_queued(&self, workspace_id: Option<Uuid>, limit: usize) -> DomainResult<Vec<StageRun>> {
        let workspace = workspace_id.map(|id| id.to_string());
        let rows: Vec<StageRunRow> = sqlx::query_as(
            r#"SELECT * FROM stage_runs
               WHERE status = 'queued' AND (? IS NULL OR workspace_id = ?)
               ORDER BY created_at ASC LIMIT ?"#,
        )
        .bind(&workspace)
        .bind(&workspace)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE stage_runs SET status = 'running', started_at = ?, claimed_by = ?
               WHERE id = ? AND status = 'queued'"#,
        )
        .bind(format_datetime(now))
        .bind(worker_id)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        id: Uuid,
        status: RunStatus,
        error_summary: Option<&str>,
        metadata_patch: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, String)> =
            sqlx::query_as("SELECT status, metadata FROM stage_runs WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        let Some((current_status, metadata_json)) = current else {
            return Err(DomainError::RunNotFound(id));
        };
        if RunStatus::from_str(&current_status).is_some_and(|s| s.is_terminal()) {
            return Ok(false);
        }

        let mut metadata: Map<String, Value> = parse_json_or_default(Some(metadata_json))?;
        for (key, value) in metadata_patch {
            metadata.insert(key.clone(), value.clone());
        }

        let result = sqlx::query(
            r#"UPDATE stage_runs SET status = ?, error_summary = ?, metadata = ?, finished_at = ?
               WHERE id = ? AND status IN ('queued', 'running')"#,
        )
        .bind(status.as_str())
        .bind(error_summary)
        .bind(serde_json::to_string(&metadata)?)
        .bind(format_datetime(now))
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            return Ok(false);
        }

        sqlx::query("UPDATE worker_heartbeats SET active_run_id = NULL WHERE active_run_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_running_started_before(&self, started_before: DateTime<Utc>) -> DomainResult<Vec<StageRun>> {
        let rows: Vec<StageRunRow> = sqlx::query_as(
            r#"SELECT * FROM stage_runs
               WHERE status = 'running' AND started_at IS NOT NULL AND started_at < ?
               ORDER BY started_at ASC"#,
        )
        .bind(format_datetime(started_before))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn fail_if_running(&self, id: Uuid, error_summary: &str, now: DateTime<Utc>) -> DomainResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"UPDATE stage_runs SET status = 'failed', error_summary = ?, finished_at = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(error_summary)
        .bind(format_datetime(now))
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 1 {
            sqlx::query("UPDATE worker_heartbeats SET active_run_id = NULL WHERE active_run_id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_by_status(&self, workspace_id: Option<Uuid>) -> DomainResult<HashMap<RunStatus, u64>> {
        let workspace = workspace_id.map(|id| id.to_string());
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT status, COUNT(*) FROM stage_runs
               WHERE (? IS NULL OR workspace_id = ?)
               GROUP BY status"#,
        )
        .bind(&workspace)
        .bind(&workspace)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            if let Some(status) = RunStatus::from_str(&status) {
                counts.insert(status, count.max(0) as u64);
            }
        }
        Ok(counts)
    }

    async fn append_log(&self, log: &RunLog) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO run_logs (run_id, timestamp, level, message, step_key) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(log.run_id.to_string())
        .bind(format_datetime(log.timestamp))
        .bind(log.level.as_str())
        .bind(&log.message)
        .bind(&log.step_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_logs(&self, run_id: Uuid) -> DomainResult<Vec<RunLog>> {
        let rows: Vec<RunLogRow> = sqlx::query_as(
            "SELECT * FROM run_logs WHERE run_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_artifact(&self, artifact: &Artifact) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO artifacts (id, run_id, card_id, stage, artifact_type, label, uri, meta, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(artifact.id.to_string())
        .bind(artifact.run_id.map(|id| id.to_string()))
        .bind(artifact.card_id.to_string())
        .bind(artifact.stage.as_str())
        .bind(&artifact.artifact_type)
        .bind(&artifact.label)
        .bind(&artifact.uri)
        .bind(serde_json::to_string(&artifact.meta)?)
        .bind(format_datetime(artifact.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_artifacts(&self, run_id: Uuid) -> DomainResult<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> =
            sqlx::query_as("SELECT * FROM artifacts WHERE run_id = ? ORDER BY created_at ASC")
                .bind(run_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_transition(&self, event: &StageTransitionEvent) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO stage_transition_events (id, card_id, from_stage, to_stage, actor, reason, run_id, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(event.card_id.to_string())
        .bind(event.from_stage.map(|s| s.as_str()))
        .bind(event.to_stage.as_str())
        .bind(&event.actor)
        .bind(&event.reason)
        .bind(event.run_id.map(|id| id.to_string()))
        .bind(format_datetime(event.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_transitions(&self, card_id: Uuid) -> DomainResult<Vec<StageTransitionEvent>> {
        let rows: Vec<TransitionRow> = sqlx::query_as(
            "SELECT * FROM stage_transition_events WHERE card_id = ? ORDER BY timestamp ASC",
        )
        .bind(card_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn parse_stage(s: &str) -> DomainResult<Stage> {
    Stage::from_str(s).ok_or_else(|| DomainError::SerializationError(format!("Invalid stage: {s}")))
}

#[derive(sqlx::FromRow)]
struct StageRunRow {
    id: String,
    card_id: String,
    workspace_id: String,
    stage: String,
    status: String,
    automation_level: String,
    provider: String,
    attempt: i64,
    idempotency_key: String,
    triggered_by: String,
    claimed_by: Option<String>,
    error_summary: Option<String>,
    metadata: Option<String>,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl TryFrom<StageRunRow> for StageRun {
    type Error = DomainError;

    fn try_from(row: StageRunRow) -> Result<Self, Self::Error> {
        let status = RunStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let automation_level = AutomationLevel::from_str(&row.automation_level).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid automation level: {}", row.automation_level))
        })?;

        Ok(StageRun {
            id: parse_uuid(&row.id)?,
            card_id: parse_uuid(&row.card_id)?,
            workspace_id: parse_uuid(&row.workspace_id)?,
            stage: parse_stage(&row.stage)?,
            status,
            automation_level,
            provider: row.provider,
            attempt: u32::try_from(row.attempt).unwrap_or(1),
            idempotency_key: row.idempotency_key,
            triggered_by: row.triggered_by,
            claimed_by: row.claimed_by,
            error_summary: row.error_summary,
            metadata: parse_json_or_default(row.metadata)?,
            created_at: parse_datetime(&row.created_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            finished_at: parse_optional_datetime(row.finished_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunLogRow {
    run_id: String,
    timestamp: String,
    level: String,
    message: String,
    step_key: Option<String>,
}

impl TryFrom<RunLogRow> for RunLog {
    type Error = DomainError;

    fn try_from(row: RunLogRow) -> Result<Self, Self::Error> {
        Ok(RunLog {
            run_id: parse_uuid(&row.run_id)?,
            timestamp: parse_datetime(&row.timestamp)?,
            level: LogLevel::from_str(&row.level).unwrap_or_default(),
            message: row.message,
            step_key: row.step_key,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    id: String,
    run_id: Option<String>,
    card_id: String,
    stage: String,
    artifact_type: String,
    label: String,
    uri: Option<String>,
    meta: Option<String>,
    created_at: String,
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = DomainError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        Ok(Artifact {
            id: parse_uuid(&row.id)?,
            run_id: parse_optional_uuid(row.run_id)?,
            card_id: parse_uuid(&row.card_id)?,
            stage: parse_stage(&row.stage)?,
            artifact_type: row.artifact_type,
            label: row.label,
            uri: row.uri,
            meta: parse_json_or_default(row.meta)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransitionRow {
    id: String,
    card_id: String,
    from_stage: Option<String>,
    to_stage: String,
    actor: String,
    reason: Option<String>,
    run_id: Option<String>,
    timestamp: String,
}

impl TryFrom<TransitionRow> for StageTransitionEvent {
    type Error = DomainError;

    fn try_from(row: TransitionRow) -> Result<Self, Self::Error> {
        Ok(StageTransitionEvent {
            id: parse_uuid(&row.id)?,
            card_id: parse_uuid(&row.card_id)?,
            from_stage: row.from_stage.as_deref().map(parse_stage).transpose()?,
            to_stage: parse_stage(&row.to_stage)?,
            actor: row.actor,
            reason: row.reason,
            run_id: parse_optional_uuid(row.run_id)?,
            timestamp: parse_datetime(&row.timestamp)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator};
    use serde_json::json;

    async fn setup_test_repo() -> SqliteStageRunRepository {
        let pool = create_test_pool().await.unwrap();
        let migrator = Migrator::new(pool.clone());
        migrator.run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        SqliteStageRunRepository::new(pool)
    }

    fn queued_run(card_id: Uuid, stage: Stage) -> StageRun {
        StageRun::new(card_id, Uuid::new_v4(), stage, "test").with_provider("mock")
    }

    #[tokio::test]
    async fn test_second_active_insert_returns_existing() {
        let repo = setup_test_repo().await;
        let card = Uuid::new_v4();

        let (first, created) = repo.create_or_get_active(&queued_run(card, Stage::Prd)).await.unwrap();
        assert!(created);
        let (second, created_again) = repo.create_or_get_active(&queued_run(card, Stage::Prd)).await.unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);

        // a different stage of the same card is independent
        let (other, created_other) = repo.create_or_get_active(&queued_run(card, Stage::Design)).await.unwrap();
        assert!(created_other);
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn test_claim_only_from_queued() {
        let repo = setup_test_repo().await;
        let (run, _) = repo.create_or_get_active(&queued_run(Uuid::new_v4(), Stage::Prd)).await.unwrap();

        assert!(repo.claim(run.id, "w-1", Utc::now()).await.unwrap());
        assert!(!repo.claim(run.id, "w-2", Utc::now()).await.unwrap());

        let stored = repo.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert_eq!(stored.claimed_by.as_deref(), Some("w-1"));
        assert!(stored.started_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_merges_metadata_and_is_single_shot() {
        let repo = setup_test_repo().await;
        let mut run = queued_run(Uuid::new_v4(), Stage::Prd);
        run.metadata.insert("origin".into(), json!("api"));
        let (run, _) = repo.create_or_get_active(&run).await.unwrap();
        repo.claim(run.id, "w-1", Utc::now()).await.unwrap();

        let mut patch = Map::new();
        patch.insert("durationMs".into(), json!(1200));
        let done = repo
            .complete(run.id, RunStatus::Succeeded, None, &patch, Utc::now())
            .await
            .unwrap();
        assert!(done);

        let stored = repo.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert_eq!(stored.metadata.get("origin"), Some(&json!("api")));
        assert_eq!(stored.metadata.get("durationMs"), Some(&json!(1200)));
        assert!(stored.finished_at.is_some());

        let again = repo
            .complete(run.id, RunStatus::Failed, Some("late"), &Map::new(), Utc::now())
            .await
            .unwrap();
        assert!(!again);
        assert_eq!(repo.get(run.id).await.unwrap().unwrap().status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_complete_unknown_run() {
        let repo = setup_test_repo().await;
        let err = repo
            .complete(Uuid::new_v4(), RunStatus::Failed, None, &Map::new(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_queued_listing_is_oldest_first() {
        let repo = setup_test_repo().await;
        let workspace = Uuid::new_v4();
        let mut ids = vec![];
        for i in 0..3 {
            let mut run = StageRun::new(Uuid::new_v4(), workspace, Stage::Prd, "test");
            run.created_at = Utc::now() - chrono::Duration::seconds(10 - i);
            repo.create_or_get_active(&run).await.unwrap();
            ids.push(run.id);
        }
        repo.create_or_get_active(&queued_run(Uuid::new_v4(), Stage::Prd)).await.unwrap();

        let scoped = repo.list_queued(Some(workspace), 10).await.unwrap();
        assert_eq!(scoped.iter().map(|r| r.id).collect::<Vec<_>>(), ids);

        let all = repo.list_queued(None, 10).await.unwrap();
        assert_eq!(all.len(), 4);

        let limited = repo.list_queued(Some(workspace), 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_logs_artifacts_and_transitions() {
        let repo = setup_test_repo().await;
        let (run, _) = repo.create_or_get_active(&queued_run(Uuid::new_v4(), Stage::Prd)).await.unwrap();

        repo.append_log(&RunLog::new(run.id, LogLevel::Info, "first")).await.unwrap();
        repo.append_log(&RunLog::new(run.id, LogLevel::Warn, "second").with_step("verify:1"))
            .await
            .unwrap();
        let logs = repo.list_logs(run.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "first");
        assert_eq!(logs[1].step_key.as_deref(), Some("verify:1"));

        let artifact = Artifact::new(run.card_id, Stage::Prd, "document", "PRD v1")
            .for_run(run.id)
            .with_uri("doc://p/prd/v1");
        repo.insert_artifact(&artifact).await.unwrap();
        let artifacts = repo.list_artifacts(run.id).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].uri.as_deref(), Some("doc://p/prd/v1"));

        let event = StageTransitionEvent::new(run.card_id, Some(Stage::Prd), Stage::Design, "worker:w-1")
            .with_reason("auto-advance")
            .with_run(run.id);
        repo.insert_transition(&event).await.unwrap();
        let events = repo.list_transitions(run.card_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from_stage, Some(Stage::Prd));
        assert_eq!(events[0].run_id, Some(run.id));
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let repo = setup_test_repo().await;
        let workspace = Uuid::new_v4();
        let (a, _) = repo
            .create_or_get_active(&StageRun::new(Uuid::new_v4(), workspace, Stage::Prd, "t"))
            .await
            .unwrap();
        repo.create_or_get_active(&StageRun::new(Uuid::new_v4(), workspace, Stage::Prd, "t"))
            .await
            .unwrap();
        repo.claim(a.id, "w", Utc::now()).await.unwrap();

        let counts = repo.count_by_status(Some(workspace)).await.unwrap();
        assert_eq!(counts.get(&RunStatus::Queued), Some(&1));
        assert_eq!(counts.get(&RunStatus::Running), Some(&1));
        assert_eq!(counts.get(&RunStatus::Failed), None);

        let other = repo.count_by_status(Some(Uuid::new_v4())).await.unwrap();
        assert!(other.is_empty());
    }
}
