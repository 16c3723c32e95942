//! Stage run domain model.
//!
//! A stage run is one automation attempt of a stage for a card. Runs are
//! created queued, enter `running` only through an atomic claim, and end in
//! one of the terminal states. Retries never touch a terminal row; they
//! insert a new run with the next attempt number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A named phase in the fixed pipeline vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Captured, not yet worked
    Inbox,
    /// Research
    Discovery,
    /// Product requirements
    Prd,
    /// Design brief
    Design,
    /// Prototype spec
    Prototype,
    /// Jury validation
    Validate,
    /// Ticket breakdown
    Tickets,
    /// Engineering (manual)
    Build,
    /// Shipping (manual)
    Release,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Stage; 9] = [
        Self::Inbox,
        Self::Discovery,
        Self::Prd,
        Self::Design,
        Self::Prototype,
        Self::Validate,
        Self::Tickets,
        Self::Build,
        Self::Release,
    ];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Discovery => "discovery",
            Self::Prd => "prd",
            Self::Design => "design",
            Self::Prototype => "prototype",
            Self::Validate => "validate",
            Self::Tickets => "tickets",
            Self::Build => "build",
            Self::Release => "release",
        }
    }

    /// Parse a stage name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "inbox" => Some(Self::Inbox),
            "discovery" => Some(Self::Discovery),
            "prd" => Some(Self::Prd),
            "design" => Some(Self::Design),
            "prototype" => Some(Self::Prototype),
            "validate" | "validation" => Some(Self::Validate),
            "tickets" => Some(Self::Tickets),
            "build" => Some(Self::Build),
            "release" => Some(Self::Release),
            _ => None,
        }
    }

    /// The stage that follows this one, if any.
    pub fn next(&self) -> Option<Stage> {
        let idx = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting to be claimed by a worker
    #[default]
    Queued,
    /// Claimed and executing
    Running,
    /// Finished and verified
    Succeeded,
    /// Finished with an error, gate failure, or rescue
    Failed,
    /// Stopped before completion
    Cancelled,
}

impl RunStatus {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" | "success" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Succeeded, failed or cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Queued and running runs lock their (card, stage) pair.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Only failed or cancelled runs may spawn a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much the engine is trusted to act on its own for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationLevel {
    /// Generate output only; a human moves the card.
    Manual,
    /// Generate and verify; a human confirms advancement.
    #[default]
    Assisted,
    /// Generate, verify and advance the card when gates pass.
    Autonomous,
}

impl AutomationLevel {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Assisted => "assisted",
            Self::Autonomous => "autonomous",
        }
    }

    /// Parse a level, accepting common aliases.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "assisted" | "semi" | "semi_auto" => Some(Self::Assisted),
            "autonomous" | "auto" | "full_auto" => Some(Self::Autonomous),
            _ => None,
        }
    }
}

/// One automation attempt of a stage for a card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRun {
    /// Unique run id
    pub id: Uuid,
    /// Card being worked
    pub card_id: Uuid,
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Stage being automated
    pub stage: Stage,
    /// Lifecycle status
    pub status: RunStatus,
    /// How far the engine may act on its own
    pub automation_level: AutomationLevel,
    /// Execution provider name used for this run
    pub provider: String,
    /// 1 for the first attempt, incremented on every retry
    pub attempt: u32,
    /// Derived from (card, stage, creation time)
    pub idempotency_key: String,
    /// Who asked for the run
    pub triggered_by: String,
    /// Worker that claimed the run, set atomically with `running`
    pub claimed_by: Option<String>,
    /// Why the run failed or was cancelled
    pub error_summary: Option<String>,
    /// Opaque results: token usage, gate results, task results
    pub metadata: Map<String, Value>,
    /// Queued at
    pub created_at: DateTime<Utc>,
    /// Claimed at
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal at
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageRun {
    /// Build a fresh queued run.
    pub fn new(
        card_id: Uuid,
        workspace_id: Uuid,
        stage: Stage,
        triggered_by: impl Into<String>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            card_id,
            workspace_id,
            stage,
            status: RunStatus::Queued,
            automation_level: AutomationLevel::default(),
            provider: String::new(),
            attempt: 1,
            idempotency_key: idempotency_key(card_id, stage, created_at),
            triggered_by: triggered_by.into(),
            claimed_by: None,
            error_summary: None,
            metadata: Map::new(),
            created_at,
            started_at: None,
            finished_at: None,
        }
    }

    /// Set the automation level.
    pub fn with_automation_level(mut self, level: AutomationLevel) -> Self {
        self.automation_level = level;
        self
    }

    /// Set the provider name.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Build the queued successor of a failed or cancelled run.
    pub fn retry_of(original: &StageRun, triggered_by: impl Into<String>) -> Self {
        let mut run = Self::new(
            original.card_id,
            original.workspace_id,
            original.stage,
            triggered_by,
        )
        .with_automation_level(original.automation_level)
        .with_provider(original.provider.clone());
        run.attempt = original.attempt + 1;
        run.metadata
            .insert("retryOf".to_string(), Value::String(original.id.to_string()));
        run
    }

    /// Wall-clock duration between start and finish.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Key derived from (card, stage, creation time).
pub fn idempotency_key(card_id: Uuid, stage: Stage, created_at: DateTime<Utc>) -> String {
    format!(
        "{}:{}:{}",
        card_id,
        stage.as_str(),
        created_at.timestamp_nanos_opt().unwrap_or_else(|| created_at.timestamp_micros())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::Inbox.next(), Some(Stage::Discovery));
        assert_eq!(Stage::Validate.next(), Some(Stage::Tickets));
        assert_eq!(Stage::Release.next(), None);
    }

    #[test]
    fn test_stage_round_trip_names() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_str(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::from_str("Validation"), Some(Stage::Validate));
        assert_eq!(Stage::from_str("nope"), None);
    }

    #[test]
    fn test_status_classification() {
        assert!(RunStatus::Queued.is_active());
        assert!(RunStatus::Running.is_active());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_retryable());
        assert!(RunStatus::Cancelled.is_retryable());
        assert!(!RunStatus::Succeeded.is_retryable());
        assert!(!RunStatus::Running.is_retryable());
    }

    #[test]
    fn test_retry_of_copies_lineage() {
        let card = Uuid::new_v4();
        let mut original = StageRun::new(card, Uuid::new_v4(), Stage::Prd, "user:ana")
            .with_provider("mock")
            .with_automation_level(AutomationLevel::Autonomous);
        original.status = RunStatus::Failed;
        original.attempt = 2;

        let retry = StageRun::retry_of(&original, "user:ana");
        assert_ne!(retry.id, original.id);
        assert_eq!(retry.card_id, card);
        assert_eq!(retry.stage, Stage::Prd);
        assert_eq!(retry.attempt, 3);
        assert_eq!(retry.status, RunStatus::Queued);
        assert_eq!(retry.provider, "mock");
        assert_eq!(retry.automation_level, AutomationLevel::Autonomous);
        assert_eq!(
            retry.metadata.get("retryOf").and_then(Value::as_str),
            Some(original.id.to_string().as_str())
        );
    }

    #[test]
    fn test_idempotency_key_shape() {
        let card = Uuid::new_v4();
        let run = StageRun::new(card, Uuid::new_v4(), Stage::Design, "api");
        assert!(run.idempotency_key.starts_with(&format!("{card}:design:")));
    }
}
