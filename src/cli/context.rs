//! Composition root shared by the commands: opens the store and wires the
//! services from configuration.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

use crate::adapters::personas;
use crate::adapters::providers::ProviderRegistry;
use crate::adapters::source_control;
use crate::adapters::sqlite::{
    database_url, initialize_database, PoolConfig, SqliteCardRepository, SqliteDocumentRepository,
    SqliteRecipeRepository, SqliteStageRunRepository, SqliteWorkerRepository,
};
use crate::domain::models::Config;
use crate::domain::ports::{CardRepository, DocumentStore, RecipeRepository};
use crate::services::{
    rate_limit_registry, EngineOperations, ExecutorSettings, JuryPanel, JurySettings, RunManager,
    RunManagerSettings, StageExecutor, StageWorker, WorkerSettings,
};

/// Everything a command needs, opened from the config.
pub struct Engine {
    /// Loaded configuration
    pub config: Config,
    /// Migrated database pool
    pub pool: SqlitePool,
    /// Run lifecycle
    pub runs: Arc<RunManager>,
    /// Cards and workspaces
    pub cards: Arc<dyn CardRepository>,
    /// Project documents
    pub documents: Arc<dyn DocumentStore>,
    /// Stage recipes
    pub recipes: Arc<dyn RecipeRepository>,
}

impl Engine {
    /// Open (and migrate) the configured database.
    pub async fn open(config: Config) -> Result<Self> {
        if let Some(parent) = Path::new(&config.database.path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let pool = initialize_database(
            &database_url(&config.database.path),
            Some(PoolConfig::from(&config.database)),
        )
        .await
        .context("Failed to initialize database")?;

        let runs = Arc::new(RunManager::new(
            Arc::new(SqliteStageRunRepository::new(pool.clone())),
            Arc::new(SqliteWorkerRepository::new(pool.clone())),
            RunManagerSettings::from_config(&config),
        ));
        Ok(Self {
            cards: Arc::new(SqliteCardRepository::new(pool.clone())),
            documents: Arc::new(SqliteDocumentRepository::new(pool.clone())),
            recipes: Arc::new(SqliteRecipeRepository::new(pool.clone())),
            runs,
            pool,
            config,
        })
    }

    /// Health, rescue and cleanup.
    pub fn operations(&self) -> EngineOperations {
        EngineOperations::new(self.runs.clone())
    }

    /// Providers wrapped with per-backend rate limiting.
    pub fn providers(&self) -> Result<ProviderRegistry> {
        let registry =
            ProviderRegistry::from_config(&self.config.provider).context("Failed to build providers")?;
        Ok(rate_limit_registry(registry, &self.config))
    }

    /// Persona panels for the validate-stage jury.
    pub fn jury(&self) -> JuryPanel {
        JuryPanel::new(
            personas::from_config(&self.config.jury),
            JurySettings::from(&self.config.jury),
        )
    }

    /// Stage executor with configured providers, write-back and jury.
    pub fn executor(&self) -> Result<StageExecutor> {
        Ok(StageExecutor::new(
            self.cards.clone(),
            self.documents.clone(),
            self.recipes.clone(),
            Arc::new(self.providers()?),
            source_control::from_config(&self.config.source_control),
            ExecutorSettings::from_config(&self.config),
        )
        .with_jury_panel(self.jury()))
    }

    /// Worker for this process.
    pub fn worker(&self) -> Result<StageWorker> {
        Ok(StageWorker::new(
            self.runs.clone(),
            Arc::new(self.executor()?),
            self.cards.clone(),
            WorkerSettings::from_config(&self.config),
        ))
    }
}
