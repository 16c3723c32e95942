//! Source-control write-back port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// A file to write, relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the repository root
    pub path: String,
    /// Full file content
    pub content: String,
}

impl SourceFile {
    /// File at `path` with `content`.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Where verified work is committed.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// False for the no-op adapter.
    fn is_enabled(&self) -> bool;

    /// Directory inside the repository that documents are written to.
    fn docs_dir(&self) -> &str;

    /// Write `files` and commit them. Returns the commit id, or `None` when
    /// nothing changed.
    async fn commit_files(&self, files: &[SourceFile], message: &str) -> DomainResult<Option<String>>;

    /// Those of `paths` with uncommitted changes in the working tree, with
    /// their current content. Deleted and unchanged paths are left out.
    async fn changed_files(&self, paths: &[String]) -> DomainResult<Vec<SourceFile>>;
}
