//! Stage transition audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage_run::Stage;

/// A card moved between stages. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransitionEvent {
    /// Unique event id
    pub id: Uuid,
    /// Card that moved
    pub card_id: Uuid,
    /// Stage before, `None` for the first placement
    pub from_stage: Option<Stage>,
    /// Stage after
    pub to_stage: Stage,
    /// `user:<id>`, `worker:<id>`, `system`
    pub actor: String,
    /// Why it moved
    pub reason: Option<String>,
    /// Run that caused the move
    pub run_id: Option<Uuid>,
    /// When it moved
    pub timestamp: DateTime<Utc>,
}

impl StageTransitionEvent {
    /// Transition recorded now.
    pub fn new(
        card_id: Uuid,
        from_stage: Option<Stage>,
        to_stage: Stage,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            card_id,
            from_stage,
            to_stage,
            actor: actor.into(),
            reason: None,
            run_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach the causing run.
    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }
}
