//! SQLite implementation of the RecipeRepository. Steps, gates and config
//! are stored as JSON columns.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_json_or_default, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Recipe, Stage};
use crate::domain::ports::RecipeRepository;

/// SQLite recipes, stored as JSON per (workspace, stage).
#[derive(Clone)]
pub struct SqliteRecipeRepository {
    pool: SqlitePool,
}

impl SqliteRecipeRepository {
    /// Repository on `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipeRepository for SqliteRecipeRepository {
    async fn get(&self, workspace_id: Uuid, stage: Stage) -> DomainResult<Option<Recipe>> {
        let row: Option<RecipeRow> =
            sqlx::query_as("SELECT * FROM recipes WHERE workspace_id = ? AND stage = ?")
                .bind(workspace_id.to_string())
                .bind(stage.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn save(&self, recipe: &Recipe) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO recipes (workspace_id, stage, steps, gates, config, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(workspace_id, stage) DO UPDATE SET
                   steps = excluded.steps, gates = excluded.gates,
                   config = excluded.config, updated_at = excluded.updated_at"#,
        )
        .bind(recipe.workspace_id.to_string())
        .bind(recipe.stage.as_str())
        .bind(serde_json::to_string(&recipe.steps)?)
        .bind(serde_json::to_string(&recipe.gates)?)
        .bind(serde_json::to_string(&recipe.config)?)
        .bind(format_datetime(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, workspace_id: Uuid) -> DomainResult<Vec<Recipe>> {
        let rows: Vec<RecipeRow> = sqlx::query_as("SELECT * FROM recipes WHERE workspace_id = ?")
            .bind(workspace_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut recipes = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<DomainResult<Vec<Recipe>>>()?;
        recipes.sort_by_key(|r| r.stage);
        Ok(recipes)
    }
}

#[derive(sqlx::FromRow)]
struct RecipeRow {
    workspace_id: String,
    stage: String,
    steps: Option<String>,
    gates: Option<String>,
    config: Option<String>,
}

impl TryFrom<RecipeRow> for Recipe {
    type Error = DomainError;

    fn try_from(row: RecipeRow) -> Result<Self, Self::Error> {
        let stage = Stage::from_str(&row.stage)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid stage: {}", row.stage)))?;
        Ok(Recipe {
            workspace_id: parse_uuid(&row.workspace_id)?,
            stage,
            steps: parse_json_or_default(row.steps)?,
            gates: parse_json_or_default(row.gates)?,
            config: parse_json_or_default(row.config)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{GateDefinition, GateType, OnFailBehavior, RecipeConfig, RecipeStep};
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_reload() {
        let repo = SqliteRecipeRepository::new(create_migrated_test_pool().await.unwrap());
        let workspace = Uuid::new_v4();
        let recipe = Recipe::new(workspace, Stage::Prd)
            .with_step(RecipeStep::new("prd-writer", "Draft").with_criterion("file:prd"))
            .with_gate(GateDefinition::new("has-prd", GateType::FileExists, json!({"document_type": "prd"})))
            .with_config(RecipeConfig {
                on_fail_behavior: OnFailBehavior::Stay,
                ..RecipeConfig::default()
            });
        repo.save(&recipe).await.unwrap();
        repo.save(&recipe).await.unwrap();

        let loaded = repo.get(workspace, Stage::Prd).await.unwrap().unwrap();
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(loaded.steps[0].verification_criteria, vec!["file:prd"]);
        assert_eq!(loaded.gates[0].id, "has-prd");
        assert_eq!(loaded.config.on_fail_behavior, OnFailBehavior::Stay);

        assert!(repo.get(workspace, Stage::Design).await.unwrap().is_none());
        assert_eq!(repo.list(workspace).await.unwrap().len(), 1);
    }
}
