//! Scripted provider for tests and dry runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionOutcome, ExecutionRequest, LogLevel, TokenUsage};
use crate::domain::ports::{ExecutionProvider, RunCallbacks};

/// Registry name of this provider.
pub const PROVIDER_NAME: &str = "mock";

/// Mock response configuration.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Output text
    pub output: String,
    /// Return `success=false` with `error_message`
    pub fail: bool,
    /// Error message if failing
    pub error_message: Option<String>,
    /// Return `DomainError::ProviderUnavailable` instead of an outcome
    pub unavailable: bool,
    /// Panic inside `execute`
    pub panic: bool,
    /// Sleep before answering
    pub delay: Option<Duration>,
    /// Reported prompt tokens
    pub input_tokens: u64,
    /// Reported completion tokens
    pub output_tokens: u64,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            output: "Mock output.".to_string(),
            fail: false,
            error_message: None,
            unavailable: false,
            panic: false,
            delay: None,
            input_tokens: 100,
            output_tokens: 50,
        }
    }
}

impl MockResponse {
    /// Successful output.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    /// Model-level failure.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    /// Transient outage.
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            unavailable: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    /// Panic while executing.
    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Default::default()
        }
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Provider that answers from a script.
///
/// Lookup order: queued one-shot responses, then the first rule whose
/// pattern occurs in either prompt, then the default response.
pub struct MockProvider {
    default_response: MockResponse,
    queued: Arc<RwLock<VecDeque<MockResponse>>>,
    rules: Arc<RwLock<Vec<(String, MockResponse)>>>,
    requests: Arc<RwLock<Vec<ExecutionRequest>>>,
}

impl MockProvider {
    /// Provider answering "Mock output." by default.
    pub fn new() -> Self {
        Self::with_default_response(MockResponse::default())
    }

    /// Provider with a custom default answer.
    pub fn with_default_response(response: MockResponse) -> Self {
        Self {
            default_response: response,
            queued: Arc::new(RwLock::new(VecDeque::new())),
            rules: Arc::new(RwLock::new(Vec::new())),
            requests: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Answer the next call with `response`.
    pub async fn push_response(&self, response: MockResponse) {
        self.queued.write().await.push_back(response);
    }

    /// Answer every call whose prompts contain `pattern` with `response`.
    pub async fn respond_when(&self, pattern: impl Into<String>, response: MockResponse) {
        self.rules.write().await.push((pattern.into(), response));
    }

    /// Every request received so far.
    pub async fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.read().await.clone()
    }

    /// Number of calls made.
    pub async fn call_count(&self) -> usize {
        self.requests.read().await.len()
    }

    async fn pick_response(&self, request: &ExecutionRequest) -> MockResponse {
        if let Some(next) = self.queued.write().await.pop_front() {
            return next;
        }
        let rules = self.rules.read().await;
        rules
            .iter()
            .find(|(pattern, _)| {
                request.user_prompt.contains(pattern.as_str())
                    || request.system_prompt.contains(pattern.as_str())
            })
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.default_response.clone())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionProvider for MockProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn is_available(&self) -> DomainResult<bool> {
        Ok(true)
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        callbacks: &dyn RunCallbacks,
    ) -> DomainResult<ExecutionOutcome> {
        self.requests.write().await.push(request.clone());
        let response = self.pick_response(&request).await;

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        if response.panic {
            panic!("mock provider panic");
        }
        if response.unavailable {
            return Err(DomainError::ProviderUnavailable(
                response.error_message.unwrap_or_else(|| "mock unavailable".to_string()),
            ));
        }

        callbacks
            .on_log(LogLevel::Debug, "mock provider answered", request.step_key.as_deref())
            .await;

        let duration_ms = response.delay.map_or(0, |d| d.as_millis() as u64);
        if response.fail {
            return Ok(ExecutionOutcome::failed(
                response.error_message.unwrap_or_else(|| "Mock failure".to_string()),
                duration_ms,
            ));
        }
        Ok(ExecutionOutcome::succeeded(
            response.output,
            Some(TokenUsage::new(response.input_tokens, response.output_tokens)),
            duration_ms,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ExecutionContext, Stage};
    use crate::domain::ports::NoopCallbacks;
    use uuid::Uuid;

    fn request(user: &str) -> ExecutionRequest {
        ExecutionRequest::new(
            "sys",
            user,
            ExecutionContext {
                run_id: Uuid::new_v4(),
                workspace_id: Uuid::new_v4(),
                card_id: Uuid::new_v4(),
                stage: Stage::Prd,
            },
        )
    }

    #[tokio::test]
    async fn test_queue_then_rules_then_default() {
        let mock = MockProvider::with_default_response(MockResponse::success("default"));
        mock.respond_when("research", MockResponse::success("from rule")).await;
        mock.push_response(MockResponse::success("queued")).await;

        let first = mock.execute(request("research please"), &NoopCallbacks).await.unwrap();
        assert_eq!(first.output_text(), "queued");
        let second = mock.execute(request("research please"), &NoopCallbacks).await.unwrap();
        assert_eq!(second.output_text(), "from rule");
        let third = mock.execute(request("other"), &NoopCallbacks).await.unwrap();
        assert_eq!(third.output_text(), "default");
        assert_eq!(mock.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_failure_modes() {
        let mock = MockProvider::new();
        mock.push_response(MockResponse::failure("refused")).await;
        mock.push_response(MockResponse::unavailable("503")).await;

        let failed = mock.execute(request("x"), &NoopCallbacks).await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("refused"));

        let err = mock.execute(request("x"), &NoopCallbacks).await.unwrap_err();
        assert!(err.is_transient());
    }
}
