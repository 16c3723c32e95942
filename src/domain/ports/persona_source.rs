//! Persona port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Persona;

/// Where jury personas come from.
#[async_trait]
pub trait PersonaSource: Send + Sync {
    /// Personas of the newest generated batch, empty when none exists.
    async fn latest_batch(&self) -> DomainResult<Vec<Persona>>;

    /// Hand-written seed personas, empty when none exist.
    async fn seeds(&self) -> DomainResult<Vec<Persona>>;
}
