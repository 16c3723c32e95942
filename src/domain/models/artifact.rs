//! Produced-output references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::stage_run::Stage;

/// Reference to something a run produced (a document version, a commit, a
/// prototype link). Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact id
    pub id: Uuid,
    /// Run that produced the artifact, if any
    pub run_id: Option<Uuid>,
    /// Card the artifact belongs to
    pub card_id: Uuid,
    /// Stage it was produced in
    pub stage: Stage,
    /// Free-form kind: `document`, `commit`, `prototype`, ...
    pub artifact_type: String,
    /// Human-readable label
    pub label: String,
    /// Where the artifact lives (`doc://`, a commit, a URL)
    pub uri: Option<String>,
    /// Free-form details
    pub meta: Map<String, Value>,
    /// When it was recorded
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// New artifact for a card and stage.
    pub fn new(
        card_id: Uuid,
        stage: Stage,
        artifact_type: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: None,
            card_id,
            stage,
            artifact_type: artifact_type.into(),
            label: label.into(),
            uri: None,
            meta: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach the producing run.
    pub fn for_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Set the artifact uri.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Replace the details map.
    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }
}
