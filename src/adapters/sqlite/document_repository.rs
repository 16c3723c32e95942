//! SQLite implementation of the DocumentStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{normalize_doc_type, Document};
use crate::domain::ports::DocumentStore;

/// SQLite document store.
#[derive(Clone)]
pub struct SqliteDocumentRepository {
    pool: SqlitePool,
}

impl SqliteDocumentRepository {
    /// Repository on `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentRepository {
    async fn list_for_project(&self, project_id: Uuid) -> DomainResult<Vec<Document>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT * FROM documents WHERE project_id = ? ORDER BY updated_at DESC, version DESC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get(&self, project_id: Uuid, doc_type: &str) -> DomainResult<Option<Document>> {
        let row: Option<DocumentRow> =
            sqlx::query_as("SELECT * FROM documents WHERE project_id = ? AND doc_type = ?")
                .bind(project_id.to_string())
                .bind(normalize_doc_type(doc_type))
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn upsert(
        &self,
        project_id: Uuid,
        doc_type: &str,
        title: &str,
        content: &str,
    ) -> DomainResult<Document> {
        let now = format_datetime(Utc::now());
        let row: DocumentRow = sqlx::query_as(
            r#"INSERT INTO documents (id, project_id, doc_type, title, content, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, 1, ?, ?)
               ON CONFLICT(project_id, doc_type) DO UPDATE SET
                   title = excluded.title,
                   content = excluded.content,
                   version = documents.version + 1,
                   updated_at = excluded.updated_at
               RETURNING *"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(project_id.to_string())
        .bind(normalize_doc_type(doc_type))
        .bind(title)
        .bind(content)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    project_id: String,
    doc_type: String,
    title: String,
    content: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<DocumentRow> for Document {
    type Error = DomainError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(Document {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            doc_type: row.doc_type,
            title: row.title,
            content: row.content,
            version: u32::try_from(row.version).unwrap_or(1),
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
    async fn test_upsert_bumps_version() {
        let store = SqliteDocumentRepository::new(create_migrated_test_pool().await.unwrap());
        let project = Uuid::new_v4();

        let v1 = store.upsert(project, "PRD", "PRD", "# Problem").await.unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v1.doc_type, "prd");

        let v2 = store.upsert(project, "prd", "PRD", "# Problem\n# Goals").await.unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.id, v1.id);

        let fetched = store.get(project, "prd").await.unwrap().unwrap();
        assert_eq!(fetched.content, "# Problem\n# Goals");
        assert!(store.get(project, "design_brief").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = SqliteDocumentRepository::new(create_migrated_test_pool().await.unwrap());
        let project = Uuid::new_v4();
        store.upsert(project, "research", "Research", "r").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.upsert(project, "prd", "PRD", "p").await.unwrap();

        let docs = store.list_for_project(project).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].doc_type, "prd");
        assert!(store.list_for_project(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
