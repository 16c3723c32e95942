//! Disabled write-back.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::ports::{SourceControl, SourceFile};

/// Write-back disabled.
#[derive(Debug, Default, Clone)]
pub struct NoopSourceControl;

#[async_trait]
impl SourceControl for NoopSourceControl {
    fn is_enabled(&self) -> bool {
        false
    }

    fn docs_dir(&self) -> &str {
        "docs"
    }

    async fn commit_files(&self, _files: &[SourceFile], _message: &str) -> DomainResult<Option<String>> {
        Ok(None)
    }

    async fn changed_files(&self, _paths: &[String]) -> DomainResult<Vec<SourceFile>> {
        Ok(Vec::new())
    }
}
