//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces the services depend on and the adapters implement:
//! - StageRunRepository: runs, run logs, artifacts, transition events
//! - WorkerRepository: worker heartbeats
//! - CardRepository / DocumentStore / RecipeRepository: externally owned data
//! - ExecutionProvider: text-generation backends
//! - SourceControl: document write-back
//! - PersonaSource: jury personas

pub mod card_repository;
pub mod document_store;
pub mod execution_provider;
pub mod persona_source;
pub mod recipe_repository;
pub mod source_control;
pub mod stage_run_repository;
pub mod worker_repository;

pub use card_repository::CardRepository;
pub use document_store::DocumentStore;
pub use execution_provider::{ExecutionProvider, NoopCallbacks, RunCallbacks};
pub use persona_source::PersonaSource;
pub use recipe_repository::RecipeRepository;
pub use source_control::{SourceControl, SourceFile};
pub use stage_run_repository::StageRunRepository;
pub use worker_repository::WorkerRepository;
