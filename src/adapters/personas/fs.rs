//! Personas read from a directory of JSON files.
//!
//! Layout:
//! - `generated/batch-<date>/all-personas.json` (or `personas.json`)
//! - `seeds/<name>-personas.json`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Persona;
use crate::domain::ports::PersonaSource;

const BATCH_FILES: [&str; 2] = ["all-personas.json", "personas.json"];

/// Reads generated batches and seeds under one root directory.
#[derive(Debug, Clone)]
pub struct FsPersonaSource {
    root: PathBuf,
}

impl FsPersonaSource {
    /// Source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Newest batch file, by directory name.
    async fn latest_batch_file(&self) -> DomainResult<Option<PathBuf>> {
        let mut batches = list_dir(&self.root.join("generated"))
            .await?
            .into_iter()
            .filter(|p| p.is_dir() && file_name(p).starts_with("batch-"))
            .collect::<Vec<_>>();
        batches.sort_unstable_by(|a, b| b.cmp(a));

        for batch in batches {
            for name in BATCH_FILES {
                let candidate = batch.join(name);
                if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl PersonaSource for FsPersonaSource {
    async fn latest_batch(&self) -> DomainResult<Vec<Persona>> {
        let Some(file) = self.latest_batch_file().await? else {
            return Ok(Vec::new());
        };
        debug!(file = %file.display(), "Loading generated personas");
        read_personas(&file).await
    }

    async fn seeds(&self) -> DomainResult<Vec<Persona>> {
        let mut files = list_dir(&self.root.join("seeds"))
            .await?
            .into_iter()
            .filter(|p| p.is_file() && file_name(p).ends_with("-personas.json"))
            .collect::<Vec<_>>();
        files.sort_unstable();

        let mut personas = Vec::new();
        for file in files {
            // one bad seed file should not take the panel down
            match read_personas(&file).await {
                Ok(loaded) => personas.extend(loaded),
                Err(e) => warn!(file = %file.display(), error = %e, "Skipping unreadable seed personas"),
            }
        }
        Ok(personas)
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// Entries of `dir`; a missing directory is empty.
async fn list_dir(dir: &Path) -> DomainResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(DomainError::ExecutionFailed(format!("Failed to list {}: {e}", dir.display())));
        }
    };
    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DomainError::ExecutionFailed(format!("Failed to list {}: {e}", dir.display())))?
    {
        paths.push(entry.path());
    }
    Ok(paths)
}

async fn read_personas(file: &Path) -> DomainResult<Vec<Persona>> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| DomainError::ExecutionFailed(format!("Failed to read {}: {e}", file.display())))?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AdoptionStage;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, body: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn test_missing_directories_yield_nothing() {
        let dir = TempDir::new().unwrap();
        let source = FsPersonaSource::new(dir.path());
        assert!(source.latest_batch().await.unwrap().is_empty());
        assert!(source.seeds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_batch_prefers_newest_directory_and_expanded_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "generated/batch-2026-01-03/personas.json", r#"[{"id": "old"}]"#);
        write(dir.path(), "generated/batch-2026-02-10/personas.json", r#"[{"id": "plain"}]"#);
        write(dir.path(), "generated/batch-2026-02-10/all-personas.json", r#"[{"id": "expanded"}]"#);
        write(dir.path(), "generated/notes/personas.json", r#"[{"id": "ignored"}]"#);

        let batch = FsPersonaSource::new(dir.path()).latest_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "expanded");
    }

    #[tokio::test]
    async fn test_seeds_skip_unreadable_files() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "seeds/ops-personas.json",
            r#"[{"id": "s1", "archetype_id": "ops", "psychographics": {"ai_adoption_stage": "skeptic"}}]"#,
        );
        write(dir.path(), "seeds/broken-personas.json", "{not json");
        write(dir.path(), "seeds/readme.json", r#"[{"id": "not-a-seed"}]"#);

        let seeds = FsPersonaSource::new(dir.path()).seeds().await.unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].stage(), AdoptionStage::Skeptic);
    }
}
