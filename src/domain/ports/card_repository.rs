//! Card and workspace port. Both are owned by the surrounding product; the
//! engine reads them and moves a card's stage only on auto-advance.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Card, Stage, WorkspaceContext};

/// Cards and workspaces, as far as the engine needs them.
#[async_trait]
pub trait CardRepository: Send + Sync {
    /// Load a card.
    async fn get_card(&self, id: Uuid) -> DomainResult<Option<Card>>;

    /// Store a new card.
    async fn insert_card(&self, card: &Card) -> DomainResult<()>;

    /// Move a card to `to` only if it is still at `from`.
    async fn advance_stage(&self, card_id: Uuid, from: Stage, to: Stage) -> DomainResult<bool>;

    /// Load a workspace context.
    async fn get_workspace(&self, id: Uuid) -> DomainResult<Option<WorkspaceContext>>;

    /// Create or replace a workspace context.
    async fn upsert_workspace(&self, workspace: &WorkspaceContext) -> DomainResult<()>;
}
