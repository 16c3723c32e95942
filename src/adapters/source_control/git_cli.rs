//! Source-control write-back through the `git` command-line tool.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::SourceControlConfig;
use crate::domain::ports::{SourceControl, SourceFile};

/// Writes files into a working tree and commits them with `git`.
pub struct GitCliSourceControl {
    repo_path: PathBuf,
    docs_dir: String,
    author_name: String,
    author_email: String,
}

impl GitCliSourceControl {
    /// Adapter for the configured working tree.
    pub fn new(config: &SourceControlConfig) -> Self {
        Self {
            repo_path: PathBuf::from(&config.repo_path),
            docs_dir: config.docs_dir.clone(),
            author_name: config.author_name.clone(),
            author_email: config.author_email.clone(),
        }
    }

    /// Relative paths only, no `..` segments.
    fn resolve(&self, relative: &str) -> DomainResult<PathBuf> {
        let path = Path::new(relative);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(DomainError::ValidationFailed(format!(
                "Refusing to write outside the repository: {relative}"
            )));
        }
        Ok(self.repo_path.join(path))
    }

    async fn git(&self, args: &[&str]) -> DomainResult<std::process::Output> {
        debug!(?args, repo = %self.repo_path.display(), "Running git");
        Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DomainError::ExecutionFailed(format!("Failed to run git: {e}")))
    }

    async fn git_checked(&self, args: &[&str]) -> DomainResult<String> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(DomainError::ExecutionFailed(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        // porcelain status lines start with a significant space
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

#[async_trait]
impl SourceControl for GitCliSourceControl {
    fn is_enabled(&self) -> bool {
        true
    }

    fn docs_dir(&self) -> &str {
        &self.docs_dir
    }

    async fn commit_files(&self, files: &[SourceFile], message: &str) -> DomainResult<Option<String>> {
        if files.is_empty() {
            return Ok(None);
        }

        for file in files {
            let target = self.resolve(&file.path)?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DomainError::ExecutionFailed(format!("Failed to create {}: {e}", parent.display()))
                })?;
            }
            tokio::fs::write(&target, &file.content).await.map_err(|e| {
                DomainError::ExecutionFailed(format!("Failed to write {}: {e}", target.display()))
            })?;
        }

        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        let mut add_args = vec!["add", "--"];
        add_args.extend(&paths);
        self.git_checked(&add_args).await?;

        // exit 0 means the index matches HEAD for these paths
        let mut diff_args = vec!["diff", "--cached", "--quiet", "--"];
        diff_args.extend(&paths);
        if self.git(&diff_args).await?.status.success() {
            debug!(files = paths.len(), "Nothing to commit");
            return Ok(None);
        }

        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        let mut commit_args = vec!["-c", name.as_str(), "-c", email.as_str(), "commit", "--no-verify", "-m", message, "--"];
        commit_args.extend(&paths);
        self.git_checked(&commit_args).await?;

        let commit = self.git_checked(&["rev-parse", "HEAD"]).await?;
        info!(commit = %commit, files = paths.len(), "Committed documents");
        Ok(Some(commit))
    }

    async fn changed_files(&self, paths: &[String]) -> DomainResult<Vec<SourceFile>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        for path in paths {
            self.resolve(path)?;
        }

        let mut status_args = vec!["status", "--porcelain", "--untracked-files=all", "--"];
        status_args.extend(paths.iter().map(String::as_str));
        let status = self.git_checked(&status_args).await?;

        let mut changed = Vec::new();
        for path in paths {
            let dirty = status
                .lines()
                .filter_map(|line| line.get(3..))
                .any(|reported| reported == path);
            if !dirty {
                continue;
            }
            // a deletion shows up in status but has nothing to write back
            match tokio::fs::read_to_string(self.resolve(path)?).await {
                Ok(content) => changed.push(SourceFile::new(path.clone(), content)),
                Err(e) => debug!(path = %path, error = %e, "Skipping unreadable changed file"),
            }
        }
        Ok(changed)
    }
}
