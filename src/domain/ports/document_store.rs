//! Document store port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Document;

/// Versioned project documents, one current version per type.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current documents of a project, most recently updated first.
    async fn list_for_project(&self, project_id: Uuid) -> DomainResult<Vec<Document>>;

    /// Current document of a type.
    async fn get(&self, project_id: Uuid, doc_type: &str) -> DomainResult<Option<Document>>;

    /// Insert the document, or replace its content and bump the version by one.
    async fn upsert(
        &self,
        project_id: Uuid,
        doc_type: &str,
        title: &str,
        content: &str,
    ) -> DomainResult<Document>;
}
