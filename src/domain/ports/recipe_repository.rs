//! Recipe port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Recipe, Stage};

/// Recipes are configured per (workspace, stage).
#[async_trait]
pub trait RecipeRepository: Send + Sync {
    /// Recipe for a workspace stage.
    async fn get(&self, workspace_id: Uuid, stage: Stage) -> DomainResult<Option<Recipe>>;

    /// Create or replace the recipe for its (workspace, stage).
    async fn save(&self, recipe: &Recipe) -> DomainResult<()>;

    /// Every recipe in a workspace.
    async fn list(&self, workspace_id: Uuid) -> DomainResult<Vec<Recipe>>;
}
