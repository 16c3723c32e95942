//! Recipe domain model.
//!
//! A recipe is the workspace-configured automation for one stage: an
//! ordered list of steps (tasks) and a list of gates. Recipes are owned by
//! the workspace configuration and are read-only to the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::stage_run::Stage;

/// What happens to a run whose required gates fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailBehavior {
    /// The card stays put and the run is marked failed.
    Stay,
    /// The run keeps its own outcome; only the advance recommendation is cleared.
    #[default]
    Advance,
}

impl OnFailBehavior {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stay => "stay",
            Self::Advance => "advance",
        }
    }
}

/// How a failed task verification affects the task loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStrictness {
    /// Abort the run as failed.
    #[default]
    Strict,
    /// Log a warning and continue with the next task.
    Lenient,
}

impl VerificationStrictness {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Lenient => "lenient",
        }
    }
}

/// Kind of stage-level gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    /// A document of a type exists
    FileExists,
    /// A document carries the listed section headers
    SectionsExist,
    /// A jury evaluation meets a score or verdict
    JuryScore,
    /// Stage-specific logic; passes
    Custom,
}

impl GateType {
    /// Snake-case name as written in recipes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileExists => "file_exists",
            Self::SectionsExist => "sections_exist",
            Self::JuryScore => "jury_score",
            Self::Custom => "custom",
        }
    }
}

/// Optional human-facing messages attached to a gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateMessages {
    /// Shown when the gate passes
    #[serde(default)]
    pub pass: Option<String>,
    /// Shown when the gate fails
    #[serde(default)]
    pub fail: Option<String>,
}

/// A stage-level pass/fail check governing advancement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDefinition {
    /// Id reported in gate results
    pub id: String,
    /// Which check to run
    #[serde(rename = "type")]
    pub gate_type: GateType,
    /// Type-specific settings (document type, sections, thresholds)
    #[serde(default)]
    pub config: Value,
    /// Whether a failure counts against `on_fail_behavior`
    #[serde(default = "default_required")]
    pub required: bool,
    /// Optional pass/fail messages
    #[serde(default)]
    pub messages: GateMessages,
}

const fn default_required() -> bool {
    true
}

impl GateDefinition {
    /// Required gate with the given settings.
    pub fn new(id: impl Into<String>, gate_type: GateType, config: Value) -> Self {
        Self {
            id: id.into(),
            gate_type,
            config,
            required: true,
            messages: GateMessages::default(),
        }
    }

    /// Mark the gate as advisory.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// One task in a stage recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeStep {
    /// Key into the skill registry
    #[serde(alias = "skillId")]
    pub skill_id: String,
    /// Position in the task loop
    #[serde(default)]
    pub order: u32,
    /// Task name used in logs and commit messages
    pub name: String,
    /// Document type the step writes; defaults to the skill's own
    #[serde(default, alias = "documentType")]
    pub document_type: Option<String>,
    /// Files in the working tree the task may change
    #[serde(default, alias = "targetFiles")]
    pub target_files: Vec<String>,
    /// Prefixed criteria checked after generation
    #[serde(default, alias = "verificationCriteria")]
    pub verification_criteria: Vec<String>,
    /// Free-text criteria shown to the generating skill
    #[serde(default, alias = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
    /// Commit after verification instead of on save
    #[serde(default, alias = "atomicCommit")]
    pub atomic_commit: bool,
}

impl RecipeStep {
    /// Step running `skill_id`.
    pub fn new(skill_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            skill_id: skill_id.into(),
            order: 0,
            name: name.into(),
            document_type: None,
            target_files: vec![],
            verification_criteria: vec![],
            acceptance_criteria: vec![],
            atomic_commit: false,
        }
    }

    /// Set the position.
    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    /// Override the written document type.
    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    /// Add a verification criterion.
    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.verification_criteria.push(criterion.into());
        self
    }

    /// Add a target file.
    pub fn with_target_file(mut self, path: impl Into<String>) -> Self {
        self.target_files.push(path.into());
        self
    }

    /// Commit this step after it verifies.
    pub fn with_atomic_commit(mut self) -> Self {
        self.atomic_commit = true;
        self
    }
}

/// Recipe-wide behaviour switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeConfig {
    /// What a failed required gate does
    #[serde(default, alias = "onFailBehavior")]
    pub on_fail_behavior: OnFailBehavior,
    /// Falls back to the engine-wide default when unset
    #[serde(default, alias = "verificationStrictness")]
    pub verification_strictness: Option<VerificationStrictness>,
    /// Recommend advancing the card when the run succeeds and gates pass
    #[serde(default, alias = "autoAdvance")]
    pub auto_advance: bool,
    /// Allow steps flagged `atomic_commit` to write back after verification
    #[serde(default, alias = "atomicCommits")]
    pub atomic_commits: bool,
}

/// Workspace-configured tasks and gates for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Stage the recipe automates
    pub stage: Stage,
    /// Tasks, run in `order`
    #[serde(default)]
    pub steps: Vec<RecipeStep>,
    /// Gates evaluated after a successful run
    #[serde(default)]
    pub gates: Vec<GateDefinition>,
    /// Behaviour switches
    #[serde(default)]
    pub config: RecipeConfig,
}

impl Recipe {
    /// Empty recipe for a stage.
    pub fn new(workspace_id: Uuid, stage: Stage) -> Self {
        Self {
            workspace_id,
            stage,
            steps: vec![],
            gates: vec![],
            config: RecipeConfig::default(),
        }
    }

    /// Append a step.
    pub fn with_step(mut self, step: RecipeStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a gate.
    pub fn with_gate(mut self, gate: GateDefinition) -> Self {
        self.gates.push(gate);
        self
    }

    /// Replace the config.
    pub fn with_config(mut self, config: RecipeConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether any step declares verification criteria (task-loop mode).
    pub fn has_task_verification(&self) -> bool {
        self.steps.iter().any(|s| !s.verification_criteria.is_empty())
    }

    /// Steps sorted by their declared order, stable for ties.
    pub fn ordered_steps(&self) -> Vec<&RecipeStep> {
        let mut steps: Vec<&RecipeStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}
