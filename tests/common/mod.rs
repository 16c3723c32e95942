//! Shared fixtures for integration tests.
//!
//! Every harness owns a fresh in-memory database with migrations applied and
//! a scripted provider registered as the default.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use pipewright::adapters::providers::{MockProvider, ProviderRegistry};
use pipewright::adapters::source_control::NoopSourceControl;
use pipewright::adapters::sqlite::{
    create_migrated_test_pool, SqliteCardRepository, SqliteDocumentRepository,
    SqliteRecipeRepository, SqliteStageRunRepository, SqliteWorkerRepository,
};
use pipewright::domain::models::{
    AutomationLevel, Card, Document, Recipe, Stage, StageRun, WorkspaceContext,
};
use pipewright::domain::errors::DomainResult;
use pipewright::domain::ports::{
    CardRepository, DocumentStore, RecipeRepository, SourceControl, SourceFile,
};
use pipewright::services::{
    CreateRunRequest, ExecutorSettings, RunManager, RunManagerSettings, StageExecutor, StageWorker,
    WorkerSettings,
};
use sqlx::SqlitePool;
use uuid::Uuid;

pub const MOCK: &str = "mock";

/// Source control that records commits instead of touching a repository.
/// `dirty` plays the part of the working tree's uncommitted changes.
#[derive(Default)]
pub struct RecordingSourceControl {
    pub dirty: Vec<SourceFile>,
    pub commits: Mutex<Vec<(String, Vec<SourceFile>)>>,
}

impl RecordingSourceControl {
    pub fn with_dirty(dirty: Vec<SourceFile>) -> Self {
        Self {
            dirty,
            commits: Mutex::new(Vec::new()),
        }
    }

    pub async fn commits(&self) -> Vec<(String, Vec<SourceFile>)> {
        self.commits.lock().await.clone()
    }
}

#[async_trait]
impl SourceControl for RecordingSourceControl {
    fn is_enabled(&self) -> bool {
        true
    }

    fn docs_dir(&self) -> &str {
        "docs"
    }

    async fn commit_files(&self, files: &[SourceFile], message: &str) -> DomainResult<Option<String>> {
        let mut commits = self.commits.lock().await;
        commits.push((message.to_string(), files.to_vec()));
        Ok(Some(format!("{:040x}", commits.len())))
    }

    async fn changed_files(&self, paths: &[String]) -> DomainResult<Vec<SourceFile>> {
        Ok(self
            .dirty
            .iter()
            .filter(|f| paths.contains(&f.path))
            .cloned()
            .collect())
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub runs: Arc<RunManager>,
    pub cards: Arc<SqliteCardRepository>,
    pub documents: Arc<SqliteDocumentRepository>,
    pub recipes: Arc<SqliteRecipeRepository>,
    pub mock: Arc<MockProvider>,
    pub workspace_id: Uuid,
}

pub fn test_run_settings() -> RunManagerSettings {
    RunManagerSettings {
        default_provider: MOCK.to_string(),
        ..RunManagerSettings::default()
    }
}

pub fn test_worker_settings() -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(20),
        heartbeat_interval: Duration::from_millis(50),
        rescue_interval: Duration::from_secs(60),
        max_concurrent: 2,
        shutdown_timeout: Duration::from_secs(5),
        workspace_id: None,
        apply_auto_advance: true,
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(test_run_settings()).await
    }

    pub async fn with_settings(settings: RunManagerSettings) -> Self {
        let pool = create_migrated_test_pool()
            .await
            .expect("failed to create test database");
        let runs = Arc::new(RunManager::new(
            Arc::new(SqliteStageRunRepository::new(pool.clone())),
            Arc::new(SqliteWorkerRepository::new(pool.clone())),
            settings,
        ));
        let harness = Self {
            cards: Arc::new(SqliteCardRepository::new(pool.clone())),
            documents: Arc::new(SqliteDocumentRepository::new(pool.clone())),
            recipes: Arc::new(SqliteRecipeRepository::new(pool.clone())),
            mock: Arc::new(MockProvider::new()),
            workspace_id: Uuid::new_v4(),
            runs,
            pool,
        };
        harness
            .cards
            .upsert_workspace(&WorkspaceContext {
                id: harness.workspace_id,
                name: "Acme".to_string(),
                company_context: Some("Acme builds scheduling tools for clinics.".to_string()),
                guardrails: None,
            })
            .await
            .expect("failed to seed workspace");
        harness
    }

    pub fn executor(&self, settings: ExecutorSettings) -> StageExecutor {
        self.executor_with_source_control(settings, Arc::new(NoopSourceControl))
    }

    pub fn executor_with_source_control(
        &self,
        settings: ExecutorSettings,
        source_control: Arc<dyn SourceControl>,
    ) -> StageExecutor {
        let registry = ProviderRegistry::new(MOCK).with_provider(MOCK, self.mock.clone());
        StageExecutor::new(
            self.cards.clone(),
            self.documents.clone(),
            self.recipes.clone(),
            Arc::new(registry),
            source_control,
            settings,
        )
    }

    pub fn worker(&self, id: &str, settings: WorkerSettings) -> StageWorker {
        StageWorker::with_id(
            id,
            self.runs.clone(),
            Arc::new(self.executor(ExecutorSettings::default())),
            self.cards.clone(),
            settings,
        )
    }

    pub async fn seed_card(&self, stage: Stage) -> Card {
        let card = Card::new(self.workspace_id, Uuid::new_v4(), "Appointment reminders")
            .with_description("Patients forget appointments; send reminders.")
            .at_stage(stage);
        self.cards.insert_card(&card).await.expect("failed to seed card");
        card
    }

    pub async fn seed_document(&self, card: &Card, doc_type: &str, content: &str) -> Document {
        self.documents
            .upsert(card.project_id, doc_type, doc_type, content)
            .await
            .expect("failed to seed document")
    }

    pub async fn save_recipe(&self, recipe: &Recipe) {
        self.recipes.save(recipe).await.expect("failed to save recipe");
    }

    pub async fn queue(&self, card: &Card, stage: Stage, automation: AutomationLevel) -> StageRun {
        self.runs
            .create_run(
                CreateRunRequest::new(card.id, card.workspace_id, stage, "test")
                    .with_automation_level(automation),
            )
            .await
            .expect("failed to create run")
    }

    /// Poll the store until the run reaches a terminal status.
    pub async fn wait_terminal(&self, run_id: Uuid, timeout: Duration) -> StageRun {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let run = self.runs.get_run(run_id).await.expect("run disappeared");
            if run.status.is_terminal() {
                return run;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "run {run_id} still {} after {timeout:?}",
                run.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
