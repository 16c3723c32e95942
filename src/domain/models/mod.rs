//! Domain models for runs, recipes, documents and workers.

pub mod artifact;
pub mod config;
pub mod document;
pub mod persona;
pub mod provider;
pub mod recipe;
pub mod run_log;
pub mod stage_run;
pub mod transition;
pub mod verification;
pub mod worker;

pub use artifact::Artifact;
pub use config::{
    AnthropicProviderConfig, ClaudeCliProviderConfig, Config, DatabaseConfig, LoggingConfig,
    JuryConfig, ProviderConfig, RateLimitConfig, RetryConfig, SourceControlConfig, VerificationConfig,
    WorkerConfig,
};
pub use document::{Card, Document, WorkspaceContext};
pub use persona::{AdoptionStage, Persona, PersonaStats, Psychographics, Share};
pub use provider::{ExecutionContext, ExecutionOutcome, ExecutionRequest, TokenUsage};
pub use recipe::{
    GateDefinition, GateMessages, GateType, OnFailBehavior, Recipe, RecipeConfig, RecipeStep,
    VerificationStrictness,
};
pub use run_log::{LogLevel, RunLog};
pub use stage_run::{AutomationLevel, RunStatus, Stage, StageRun};
pub use transition::StageTransitionEvent;
pub use verification::{
    normalize_doc_type, ContentPattern, Criterion, CriterionResult, GateResult,
    TaskVerificationResult,
};
pub use worker::{WorkerHeartbeat, WorkerStatus};
