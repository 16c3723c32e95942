//! Stage dispatch: runs a claimed stage run's automation and evaluates its
//! gates.
//!
//! Two modes:
//! - task loop, when the workspace recipe declares verification criteria:
//!   generate, reload documents, verify, optionally commit, per step
//! - single-shot, otherwise: the stage's built-in program of one or more
//!   generation steps
//!
//! Either way the recipe's gates run last and decide whether advancing the
//! card is recommended.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::adapters::providers::ProviderRegistry;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Card, Config, Document, ExecutionContext, ExecutionRequest, GateResult, LogLevel,
    OnFailBehavior, Persona, PersonaStats, Recipe, RecipeStep, Stage, StageRun, TaskVerificationResult, TokenUsage,
    VerificationStrictness, WorkspaceContext,
};
use crate::domain::ports::{
    CardRepository, DocumentStore, ExecutionProvider, RecipeRepository, RunCallbacks, SourceControl,
    SourceFile,
};

use super::gates::{GateEvaluator, JuryEvaluation};
use super::jury::JuryPanel;
use super::skills::{SkillInput, SkillRegistry};
use super::verification::{first_json_object, VerificationContext, VerificationEngine};

/// Built-in automation for a stage without task-level verification.
#[derive(Debug, Clone, Copy)]
pub struct StageProgram {
    /// Skill ids run in order
    pub skills: &'static [&'static str],
    /// Document types that must exist before the program may run
    pub requires: &'static [&'static str],
}

/// The single-shot program for `stage`; `None` when the stage has no
/// automation.
pub fn stage_program(stage: Stage) -> Option<StageProgram> {
    let program = match stage {
        Stage::Discovery => StageProgram {
            skills: &["research"],
            requires: &[],
        },
        Stage::Prd => StageProgram {
            skills: &["prd-writer"],
            requires: &[],
        },
        Stage::Design => StageProgram {
            skills: &["design-brief"],
            requires: &["prd"],
        },
        Stage::Prototype => StageProgram {
            skills: &["prototype-spec"],
            requires: &["prd"],
        },
        Stage::Validate => StageProgram {
            skills: &["jury-evaluation"],
            requires: &["prd"],
        },
        Stage::Tickets => StageProgram {
            skills: &["ticket-writer"],
            requires: &["prd"],
        },
        Stage::Inbox | Stage::Build | Stage::Release => return None,
    };
    Some(program)
}

/// Executor-wide knobs.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Strictness for steps that do not set one
    pub default_strictness: VerificationStrictness,
    /// Longest document excerpt handed to the verifier
    pub excerpt_chars: usize,
    /// Output token cap per provider call
    pub max_tokens: u32,
}

impl ExecutorSettings {
    /// Settings drawn from the verification and provider sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_strictness: config.verification.default_strictness,
            excerpt_chars: config.verification.excerpt_chars,
            max_tokens: config.provider.max_tokens,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What a stage execution produced.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    /// Whether the stage met its checks
    pub success: bool,
    /// Why the stage failed
    pub error: Option<String>,
    /// Whether advancing the card is recommended
    pub auto_advance: bool,
    /// Token usage summed over all calls
    pub tokens: TokenUsage,
    /// Gate results for the stage
    pub gate_results: Vec<GateResult>,
    /// Per-task verification results, recipe mode only
    pub task_results: Vec<TaskVerificationResult>,
    /// `doc://` uris of every document saved
    pub documents: Vec<String>,
    /// `single_shot` or `recipe`
    pub mode: &'static str,
    /// Extra structured results (e.g. the jury score)
    pub extra: Map<String, Value>,
}

impl StageOutcome {
    fn new(mode: &'static str) -> Self {
        Self {
            success: true,
            mode,
            ..Self::default()
        }
    }

    fn fail(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.auto_advance = false;
        self.error = Some(error.into());
        self
    }

    /// Metadata patch recorded on the run.
    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert("mode".into(), json!(self.mode));
        meta.insert("autoAdvance".into(), json!(self.auto_advance));
        meta.insert(
            "tokensUsed".into(),
            json!({"input": self.tokens.input, "output": self.tokens.output}),
        );
        meta.insert("gateResults".into(), json!(self.gate_results));
        meta.insert("taskResults".into(), json!(self.task_results));
        meta.insert("documents".into(), json!(self.documents));
        for (key, value) in &self.extra {
            meta.insert(key.clone(), value.clone());
        }
        meta
    }
}

/// Loaded context shared by every step of one run.
struct RunScope<'a> {
    run: &'a StageRun,
    card: Card,
    workspace: Option<WorkspaceContext>,
    provider: Arc<dyn ExecutionProvider>,
    callbacks: &'a dyn RunCallbacks,
}

impl RunScope<'_> {
    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext {
            run_id: self.run.id,
            workspace_id: self.run.workspace_id,
            card_id: self.run.card_id,
            stage: self.run.stage,
        }
    }

    async fn log(&self, level: LogLevel, message: &str, step: Option<&str>) {
        self.callbacks.on_log(level, message, step).await;
    }
}

/// Result of one generation + save.
struct Generated {
    document: Document,
    tokens: Option<TokenUsage>,
    commit: Option<String>,
    panel: Option<PersonaStats>,
}

/// Runs one stage: builds prompts, calls the provider, verifies and stores output.
pub struct StageExecutor {
    cards: Arc<dyn CardRepository>,
    documents: Arc<dyn DocumentStore>,
    recipes: Arc<dyn RecipeRepository>,
    providers: Arc<ProviderRegistry>,
    source_control: Arc<dyn SourceControl>,
    skills: SkillRegistry,
    gates: GateEvaluator,
    jury: JuryPanel,
    settings: ExecutorSettings,
}

impl StageExecutor {
    /// An executor over the given stores and provider.
    pub fn new(
        cards: Arc<dyn CardRepository>,
        documents: Arc<dyn DocumentStore>,
        recipes: Arc<dyn RecipeRepository>,
        providers: Arc<ProviderRegistry>,
        source_control: Arc<dyn SourceControl>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            cards,
            documents,
            recipes,
            providers,
            source_control,
            skills: SkillRegistry::builtin(),
            gates: GateEvaluator::new(),
            jury: JuryPanel::empty(),
            settings,
        }
    }

    /// Seats personas from `jury` on jury evaluations.
    pub fn with_jury_panel(mut self, jury: JuryPanel) -> Self {
        self.jury = jury;
        self
    }

    /// Execute a claimed run. Errors are input or infrastructure problems
    /// (missing card, missing prerequisite, provider down); a model-level
    /// failure or failed verification is an `Ok` outcome with
    /// `success = false`.
    #[instrument(skip(self, run, callbacks), fields(run_id = %run.id, stage = %run.stage))]
    pub async fn execute(&self, run: &StageRun, callbacks: &dyn RunCallbacks) -> DomainResult<StageOutcome> {
        let card = self
            .cards
            .get_card(run.card_id)
            .await?
            .ok_or(DomainError::CardNotFound(run.card_id))?;
        let workspace = self.cards.get_workspace(run.workspace_id).await?;
        let provider_name = Some(run.provider.as_str()).filter(|p| !p.is_empty());
        let provider = self.providers.resolve(provider_name)?;
        let recipe = self.recipes.get(run.workspace_id, run.stage).await?;

        let scope = RunScope {
            run,
            card,
            workspace,
            provider,
            callbacks,
        };

        let mut outcome = match recipe.as_ref().filter(|r| r.has_task_verification()) {
            Some(recipe) => self.run_task_loop(&scope, recipe).await?,
            None => self.run_single_shot(&scope).await?,
        };

        // no recipe: built-in programs recommend advancing on success
        outcome.auto_advance = outcome.success && recipe.as_ref().map_or(true, |r| r.config.auto_advance);

        if outcome.success {
            if let Some(recipe) = recipe.as_ref().filter(|r| !r.gates.is_empty()) {
                outcome = self.apply_gates(&scope, recipe, outcome).await?;
            }
        }
        info!(success = outcome.success, auto_advance = outcome.auto_advance, "Stage execution finished");
        Ok(outcome)
    }

    async fn run_task_loop(&self, scope: &RunScope<'_>, recipe: &Recipe) -> DomainResult<StageOutcome> {
        let strictness = recipe
            .config
            .verification_strictness
            .unwrap_or(self.settings.default_strictness);
        if strictness == VerificationStrictness::Lenient {
            warn!(run_id = %scope.run.id, "Lenient verification: failed criteria will not stop this run");
            scope
                .log(
                    LogLevel::Warn,
                    "Verification is lenient: failed criteria are logged and the run continues",
                    None,
                )
                .await;
        }

        let verifier = VerificationEngine::new(scope.provider.clone(), self.settings.excerpt_chars);
        let steps = recipe.ordered_steps();
        let total = steps.len();
        let mut outcome = StageOutcome::new("task_loop");

        for (index, step) in steps.into_iter().enumerate() {
            let step_key = format!("task:{}", step.name);
            scope
                .log(LogLevel::Info, &format!("Task {}/{}: {}", index + 1, total, step.name), Some(&step_key))
                .await;

            let defer_commit = recipe.config.atomic_commits && step.atomic_commit;
            let generated = match self.generate(scope, &step.skill_id, Some(step), !defer_commit).await? {
                Ok(generated) => generated,
                Err(error) => {
                    return Ok(outcome.fail(format!("Task '{}' generation failed: {error}", step.name)));
                }
            };
            if let Some(usage) = generated.tokens {
                outcome.tokens.add(usage);
            }
            outcome.documents.push(generated.document.uri());

            let documents = self.documents.list_for_project(scope.card.project_id).await?;
            let ctx = VerificationContext {
                documents: &documents,
                workspace: scope.workspace.as_ref(),
                execution: scope.execution_context(),
            };
            let mut result = verifier.verify_task(step, &ctx, scope.callbacks).await;
            result.commit_hash = generated.commit;

            for criterion in &result.criteria_results {
                let level = if criterion.passed { LogLevel::Info } else { LogLevel::Warn };
                let mark = if criterion.passed { "pass" } else { "FAIL" };
                scope
                    .log(level, &format!("[{mark}] {}: {}", criterion.criterion, criterion.evidence), Some(&step_key))
                    .await;
            }

            if result.passed && defer_commit {
                result.commit_hash = self.commit_step(scope, step, &generated.document).await;
            }

            let passed = result.passed;
            let failed = result.failed_criteria().join(", ");
            outcome.task_results.push(result);

            if !passed {
                match strictness {
                    VerificationStrictness::Strict => {
                        return Ok(outcome.fail(format!("Verification failed for task '{}': {failed}", step.name)));
                    }
                    VerificationStrictness::Lenient => {
                        warn!(task = %step.name, failed = %failed, "Verification failed, continuing (lenient)");
                        scope
                            .log(
                                LogLevel::Warn,
                                &format!("Verification failed but continuing (lenient): {failed}"),
                                Some(&step_key),
                            )
                            .await;
                    }
                }
            }
            scope
                .callbacks
                .on_progress((index + 1) as f32 / total as f32, Some(&step.name))
                .await;
        }
        Ok(outcome)
    }

    async fn run_single_shot(&self, scope: &RunScope<'_>) -> DomainResult<StageOutcome> {
        let stage = scope.run.stage;
        let program = stage_program(stage).ok_or_else(|| DomainError::NoAutomation(stage.to_string()))?;

        let documents = self.documents.list_for_project(scope.card.project_id).await?;
        for required in program.requires {
            if !documents.iter().any(|d| d.is_type(required)) {
                return Err(DomainError::MissingPrerequisite {
                    stage: stage.to_string(),
                    document_type: (*required).to_string(),
                });
            }
        }

        let mut outcome = StageOutcome::new("single_shot");
        let total = program.skills.len();
        for (index, skill_id) in program.skills.iter().enumerate() {
            let generated = match self.generate(scope, skill_id, None, true).await? {
                Ok(generated) => generated,
                Err(error) => return Ok(outcome.fail(format!("Generation failed: {error}"))),
            };
            if let Some(usage) = generated.tokens {
                outcome.tokens.add(usage);
            }
            outcome.documents.push(generated.document.uri());

            if generated.document.is_type("jury_evaluation") {
                match first_json_object::<JuryEvaluation>(&generated.document.content) {
                    Some(jury) => {
                        outcome.extra.insert(
                            "jury".into(),
                            json!({"score": jury.score, "verdict": jury.verdict, "panel": generated.panel}),
                        );
                    }
                    None => {
                        scope
                            .log(LogLevel::Warn, "Jury evaluation has no structured score", Some("generate:jury_evaluation"))
                            .await;
                    }
                }
            }
            scope
                .callbacks
                .on_progress((index + 1) as f32 / total as f32, Some(skill_id))
                .await;
        }
        Ok(outcome)
    }

    /// Run one skill and save its document. The inner `Err` carries a
    /// model-level failure message.
    async fn generate(
        &self,
        scope: &RunScope<'_>,
        skill_id: &str,
        step: Option<&RecipeStep>,
        write_back: bool,
    ) -> DomainResult<Result<Generated, String>> {
        let documents = self.documents.list_for_project(scope.card.project_id).await?;
        let skill = self.skills.resolve(skill_id);
        let panel = if skill.uses_panel() {
            self.draw_panel(scope).await
        } else {
            Vec::new()
        };
        let prompt = skill.build_prompt(&SkillInput {
            card: &scope.card,
            workspace: scope.workspace.as_ref(),
            documents: &documents,
            step,
            panel: &panel,
        });
        let step_key = format!("generate:{}", prompt.document_type);
        scope
            .log(LogLevel::Info, &format!("Generating {} with {}", prompt.document_type, skill.id), Some(&step_key))
            .await;

        let request = ExecutionRequest::new(prompt.system_prompt, prompt.user_prompt, scope.execution_context())
            .with_max_tokens(self.settings.max_tokens)
            .with_step_key(step_key.clone());
        let result = scope.provider.execute(request, scope.callbacks).await?;
        if !result.success {
            let error = result.error.unwrap_or_else(|| "provider returned no output".to_string());
            scope.log(LogLevel::Error, &error, Some(&step_key)).await;
            return Ok(Err(error));
        }
        if result.output_text().trim().is_empty() {
            scope.log(LogLevel::Error, "Provider returned empty output", Some(&step_key)).await;
            return Ok(Err("empty output".to_string()));
        }

        let document = self
            .documents
            .upsert(scope.card.project_id, &prompt.document_type, &prompt.title, result.output_text())
            .await?;
        debug!(doc_type = %document.doc_type, version = document.version, "Document saved");

        let mut meta = Map::new();
        meta.insert("documentId".into(), json!(document.id));
        meta.insert("docType".into(), json!(document.doc_type));
        meta.insert("version".into(), json!(document.version));
        scope
            .callbacks
            .on_artifact("document", &document.title, Some(&document.uri()), meta)
            .await;

        let commit = if write_back {
            let path = self.document_path(&scope.card, &document);
            self.write_back(scope, vec![SourceFile::new(path, document.content.clone())], &document.title)
                .await
        } else {
            None
        };

        Ok(Ok(Generated {
            document,
            tokens: result.tokens_used,
            commit,
            panel: (!panel.is_empty()).then(|| PersonaStats::of(&panel)),
        }))
    }

    /// Personas for a jury prompt, seeded by the run id so a run always
    /// draws the same panel. Empty when none are available.
    async fn draw_panel(&self, scope: &RunScope<'_>) -> Vec<Persona> {
        let step = Some("generate:jury_evaluation");
        let (seed, _) = scope.run.id.as_u64_pair();
        match self.jury.assemble(seed).await {
            Ok(panel) if panel.is_empty() => {
                scope
                    .log(LogLevel::Warn, "No personas available, the jury runs without a panel", step)
                    .await;
                panel
            }
            Ok(panel) => {
                let skeptics = panel.iter().filter(|p| p.is_skeptic()).count();
                info!(size = panel.len(), skeptics, "Jury panel drawn");
                scope
                    .log(
                        LogLevel::Info,
                        &format!("Jury panel: {} personas, {skeptics} skeptics", panel.len()),
                        step,
                    )
                    .await;
                panel
            }
            Err(e) => {
                warn!(error = %e, "Failed to load personas");
                scope
                    .log(LogLevel::Warn, &format!("Personas unavailable, the jury runs without a panel: {e}"), step)
                    .await;
                Vec::new()
            }
        }
    }

    fn document_path(&self, card: &Card, document: &Document) -> String {
        format!(
            "{}/{}/{}.md",
            self.source_control.docs_dir().trim_end_matches('/'),
            card.id,
            document.doc_type
        )
    }

    /// Commit a verified step: the document at its own path, plus whichever
    /// of the step's target files changed in the working tree, as they are.
    async fn commit_step(&self, scope: &RunScope<'_>, step: &RecipeStep, document: &Document) -> Option<String> {
        let document_path = self.document_path(&scope.card, document);
        let mut files = vec![SourceFile::new(document_path.clone(), document.content.clone())];

        let targets: Vec<String> = step
            .target_files
            .iter()
            .filter(|path| **path != document_path)
            .cloned()
            .collect();
        if self.source_control.is_enabled() && !targets.is_empty() {
            match self.source_control.changed_files(&targets).await {
                Ok(changed) => files.extend(changed),
                Err(e) => {
                    warn!(error = %e, task = %step.name, "Could not inspect target files");
                    scope
                        .log(
                            LogLevel::Warn,
                            &format!("Target files left out of the commit: {e}"),
                            Some(&format!("task:{}", step.name)),
                        )
                        .await;
                }
            }
        }
        self.write_back(scope, files, &step.name).await
    }

    /// Commit through source control. Failures are logged, never fatal.
    async fn write_back(&self, scope: &RunScope<'_>, files: Vec<SourceFile>, subject: &str) -> Option<String> {
        if !self.source_control.is_enabled() {
            return None;
        }
        let message = format!("{}: {} ({})", scope.run.stage, subject, scope.card.title);
        match self.source_control.commit_files(&files, &message).await {
            Ok(Some(hash)) => {
                let mut meta = Map::new();
                meta.insert("hash".into(), json!(hash));
                meta.insert("files".into(), json!(files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>()));
                scope.callbacks.on_artifact("commit", &message, None, meta).await;
                Some(hash)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Write-back failed");
                scope
                    .log(LogLevel::Warn, &format!("Write-back failed, document is still saved: {e}"), None)
                    .await;
                None
            }
        }
    }

    async fn apply_gates(&self, scope: &RunScope<'_>, recipe: &Recipe, mut outcome: StageOutcome) -> DomainResult<StageOutcome> {
        let documents = self.documents.list_for_project(scope.card.project_id).await?;
        let summary = self.gates.evaluate_all(&recipe.gates, &documents);

        for gate in &summary.results {
            let level = if gate.passed { LogLevel::Info } else { LogLevel::Warn };
            scope
                .log(level, &format!("Gate {} ({}): {}", gate.gate_id, gate.gate_type, gate.message), Some("gates"))
                .await;
        }

        if summary.any_failed() {
            outcome.auto_advance = false;
        }
        let failed_required = summary.failed_required().join(", ");
        outcome.gate_results = summary.results;

        if !failed_required.is_empty() && recipe.config.on_fail_behavior == OnFailBehavior::Stay {
            return Ok(outcome.fail(format!("Gate(s) failed: {failed_required}")));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_programs() {
        assert!(stage_program(Stage::Inbox).is_none());
        assert!(stage_program(Stage::Build).is_none());
        assert!(stage_program(Stage::Release).is_none());
        assert_eq!(stage_program(Stage::Discovery).unwrap().skills, &["research"]);
        assert!(stage_program(Stage::Prd).unwrap().requires.is_empty());
        for stage in [Stage::Design, Stage::Prototype, Stage::Validate, Stage::Tickets] {
            assert_eq!(stage_program(stage).unwrap().requires, &["prd"]);
        }
    }

    #[test]
    fn test_outcome_metadata_shape() {
        let mut outcome = StageOutcome::new("single_shot");
        outcome.tokens = TokenUsage::new(10, 20);
        outcome.documents.push("doc://p/prd/v1".into());
        outcome.extra.insert("jury".into(), json!({"score": 80.0}));
        let meta = outcome.to_metadata();
        assert_eq!(meta["mode"], json!("single_shot"));
        assert_eq!(meta["tokensUsed"], json!({"input": 10, "output": 20}));
        assert_eq!(meta["documents"], json!(["doc://p/prd/v1"]));
        assert_eq!(meta["jury"]["score"], json!(80.0));

        let failed = outcome.fail("boom");
        assert!(!failed.success);
        assert!(!failed.auto_advance);
    }
}
