//! Externally owned records the engine reads: cards, documents, workspaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage_run::Stage;
use super::verification::normalize_doc_type;

/// A project document, one row per (project, type). Every save bumps
/// `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique document id
    pub id: Uuid,
    /// Project the document belongs to
    pub project_id: Uuid,
    /// Normalized type (`prd`, `research`, ...)
    pub doc_type: String,
    /// Display title
    pub title: String,
    /// Markdown body
    pub content: String,
    /// Starts at 1, bumped on every rewrite
    pub version: u32,
    /// First write
    pub created_at: DateTime<Utc>,
    /// Last rewrite
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// New version-1 document; the type is normalized.
    pub fn new(
        project_id: Uuid,
        doc_type: &str,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            doc_type: normalize_doc_type(doc_type),
            title: title.into(),
            content: content.into(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// `doc://<project>/<type>/v<version>`
    pub fn uri(&self) -> String {
        format!("doc://{}/{}/v{}", self.project_id, self.doc_type, self.version)
    }

    /// Type comparison after normalization.
    pub fn is_type(&self, doc_type: &str) -> bool {
        self.doc_type == normalize_doc_type(doc_type)
    }
}

/// A unit of work moving through the stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    /// Unique card id
    pub id: Uuid,
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Project whose documents the card works on
    pub project_id: Uuid,
    /// Card title
    pub title: String,
    /// Free-text description given to generation prompts
    pub description: String,
    /// Current pipeline stage
    pub stage: Stage,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// New card in the inbox stage.
    pub fn new(workspace_id: Uuid, project_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            project_id,
            title: title.into(),
            description: String::new(),
            stage: Stage::Inbox,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Place the card at a stage.
    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }
}

/// Workspace-level context fed into prompts and AI checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceContext {
    /// Workspace id
    pub id: Uuid,
    /// Workspace name
    pub name: String,
    /// Free-text description of the company and product
    pub company_context: Option<String>,
    /// Persona and tone rules the model must respect
    pub guardrails: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_normalized() {
        let doc = Document::new(Uuid::new_v4(), "Design-Brief", "Brief", "# Brief");
        assert_eq!(doc.doc_type, "design_brief");
        assert!(doc.is_type("design brief"));
        assert!(doc.uri().ends_with("/design_brief/v1"));
    }
}
