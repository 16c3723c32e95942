//! Execution provider port - interface for text-generation backends.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionOutcome, ExecutionRequest, LogLevel};

/// Per-run sinks a provider reports into while it works.
///
/// Implementations persist what they receive and swallow their own
/// failures; a provider never fails because a callback did.
#[async_trait]
pub trait RunCallbacks: Send + Sync {
    /// A log line for the run.
    async fn on_log(&self, level: LogLevel, message: &str, step_key: Option<&str>);

    /// `fraction` is in `0.0..=1.0`.
    async fn on_progress(&self, fraction: f32, message: Option<&str>);

    /// An artifact produced by the run.
    async fn on_artifact(
        &self,
        artifact_type: &str,
        label: &str,
        uri: Option<&str>,
        meta: Map<String, Value>,
    );
}

/// Callbacks that drop everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

#[async_trait]
impl RunCallbacks for NoopCallbacks {
    async fn on_log(&self, _level: LogLevel, _message: &str, _step_key: Option<&str>) {}

    async fn on_progress(&self, _fraction: f32, _message: Option<&str>) {}

    async fn on_artifact(
        &self,
        _artifact_type: &str,
        _label: &str,
        _uri: Option<&str>,
        _meta: Map<String, Value>,
    ) {
    }
}

/// Trait for execution provider implementations.
///
/// A provider is the backend that turns a prompt pair into output text
/// (hosted model API, local command-line tool, scripted mock).
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Get the provider name as stored on runs.
    fn name(&self) -> &str;

    /// Check if the provider is available and properly configured.
    async fn is_available(&self) -> DomainResult<bool>;

    /// Run one generation call to completion.
    ///
    /// Transport problems worth retrying surface as
    /// `DomainError::ProviderUnavailable`; a model-level refusal or error is
    /// an `Ok` outcome with `success = false`.
    async fn execute(
        &self,
        request: ExecutionRequest,
        callbacks: &dyn RunCallbacks,
    ) -> DomainResult<ExecutionOutcome>;
}
