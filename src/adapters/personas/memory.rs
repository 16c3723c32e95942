//! Fixed persona lists.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Persona;
use crate::domain::ports::PersonaSource;

/// Serves the personas it was built with. The default serves none.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersonaSource {
    batch: Vec<Persona>,
    seeds: Vec<Persona>,
}

impl InMemoryPersonaSource {
    /// A source with a generated batch and seeds.
    pub fn new(batch: Vec<Persona>, seeds: Vec<Persona>) -> Self {
        Self { batch, seeds }
    }
}

#[async_trait]
impl PersonaSource for InMemoryPersonaSource {
    async fn latest_batch(&self) -> DomainResult<Vec<Persona>> {
        Ok(self.batch.clone())
    }

    async fn seeds(&self) -> DomainResult<Vec<Persona>> {
        Ok(self.seeds.clone())
    }
}
