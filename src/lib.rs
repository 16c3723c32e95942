//! Pipewright - durable stage-run execution engine
//!
//! Pipewright moves product cards through a fixed pipeline of stages. Each
//! request to execute a stage becomes a persisted run that a pool of worker
//! processes claims, executes against a text-generation provider, verifies
//! and finalizes.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Adapters** (`adapters`): SQLite store, providers, source control
//! - **Service Layer** (`services`): run manager, worker, rate limiting,
//!   verification, gates and stage execution
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use pipewright::cli::Engine;
//! use pipewright::infrastructure::config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::open(ConfigLoader::load()?).await?;
//!     let worker = engine.worker()?;
//!     worker.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     worker.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    AutomationLevel, Config, Recipe, RunStatus, Stage, StageRun, WorkerHeartbeat,
};
pub use domain::ports::{ExecutionProvider, RunCallbacks, StageRunRepository, WorkerRepository};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CreateRunRequest, EngineOperations, RunManager, StageExecutor, StageWorker};
