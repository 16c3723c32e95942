//! Persona source adapters.

pub mod fs;
pub mod memory;

use std::sync::Arc;

pub use fs::FsPersonaSource;
pub use memory::InMemoryPersonaSource;

use crate::domain::models::JuryConfig;
use crate::domain::ports::PersonaSource;

/// Directory-backed personas when a directory is configured, otherwise none.
pub fn from_config(config: &JuryConfig) -> Arc<dyn PersonaSource> {
    match config.personas_dir.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(dir) => Arc::new(FsPersonaSource::new(dir)),
        None => Arc::new(InMemoryPersonaSource::default()),
    }
}
