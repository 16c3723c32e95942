//! SQLite implementation of the CardRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Card, Stage, WorkspaceContext};
use crate::domain::ports::CardRepository;

/// SQLite cards and workspaces.
#[derive(Clone)]
pub struct SqliteCardRepository {
    pool: SqlitePool,
}

impl SqliteCardRepository {
    /// Repository on `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CardRepository for SqliteCardRepository {
    async fn get_card(&self, id: Uuid) -> DomainResult<Option<Card>> {
        let row: Option<CardRow> = sqlx::query_as("SELECT * FROM cards WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn insert_card(&self, card: &Card) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO cards (id, workspace_id, project_id, title, description, stage, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(card.id.to_string())
        .bind(card.workspace_id.to_string())
        .bind(card.project_id.to_string())
        .bind(&card.title)
        .bind(&card.description)
        .bind(card.stage.as_str())
        .bind(format_datetime(card.created_at))
        .bind(format_datetime(card.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn advance_stage(&self, card_id: Uuid, from: Stage, to: Stage) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE cards SET stage = ?, updated_at = ? WHERE id = ? AND stage = ?",
        )
        .bind(to.as_str())
        .bind(format_datetime(Utc::now()))
        .bind(card_id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_workspace(&self, id: Uuid) -> DomainResult<Option<WorkspaceContext>> {
        let row: Option<(String, String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT id, name, company_context, guardrails FROM workspaces WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((id, name, company_context, guardrails)) => Ok(Some(WorkspaceContext {
                id: parse_uuid(&id)?,
                name,
                company_context,
                guardrails,
            })),
            None => Ok(None),
        }
    }

    async fn upsert_workspace(&self, workspace: &WorkspaceContext) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO workspaces (id, name, company_context, guardrails) VALUES (?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                   company_context = excluded.company_context, guardrails = excluded.guardrails"#,
        )
        .bind(workspace.id.to_string())
        .bind(&workspace.name)
        .bind(&workspace.company_context)
        .bind(&workspace.guardrails)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CardRow {
    id: String,
    workspace_id: String,
    project_id: String,
    title: String,
    description: String,
    stage: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<CardRow> for Card {
    type Error = DomainError;

    fn try_from(row: CardRow) -> Result<Self, Self::Error> {
        let stage = Stage::from_str(&row.stage)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid stage: {}", row.stage)))?;
        Ok(Card {
            id: parse_uuid(&row.id)?,
            workspace_id: parse_uuid(&row.workspace_id)?,
            project_id: parse_uuid(&row.project_id)?,
            title: row.title,
            description: row.description,
            stage,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn test_advance_is_conditional_on_current_stage() {
        let repo = SqliteCardRepository::new(create_migrated_test_pool().await.unwrap());
        let card = Card::new(Uuid::new_v4(), Uuid::new_v4(), "Onboarding").at_stage(Stage::Prd);
        repo.insert_card(&card).await.unwrap();

        assert!(!repo.advance_stage(card.id, Stage::Design, Stage::Prototype).await.unwrap());
        assert!(repo.advance_stage(card.id, Stage::Prd, Stage::Design).await.unwrap());
        assert!(!repo.advance_stage(card.id, Stage::Prd, Stage::Design).await.unwrap());

        let stored = repo.get_card(card.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Design);
    }

    #[tokio::test]
    async fn test_workspace_upsert() {
        let repo = SqliteCardRepository::new(create_migrated_test_pool().await.unwrap());
        let mut ws = WorkspaceContext {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            company_context: Some("B2B invoicing".into()),
            guardrails: None,
        };
        repo.upsert_workspace(&ws).await.unwrap();
        ws.guardrails = Some("No pricing promises".into());
        repo.upsert_workspace(&ws).await.unwrap();

        let stored = repo.get_workspace(ws.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Acme");
        assert_eq!(stored.guardrails.as_deref(), Some("No pricing promises"));
    }
}
