//! Provider decorator adding rate limiting and transient-failure retries.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::providers::ProviderRegistry;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Config, ExecutionOutcome, ExecutionRequest, LogLevel, RetryConfig};
use crate::domain::ports::{ExecutionProvider, RunCallbacks};

use super::rate_limiter::{RateLimitSettings, SlidingWindowRateLimiter};

/// Characters per token used for the pre-call estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Retry schedule for `ProviderUnavailable` errors.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl From<&RetryConfig> for ProviderRetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.provider_max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Estimated tokens for a call: prompt characters / 4, rounded up, plus
/// the output budget.
pub fn estimate_tokens(request: &ExecutionRequest, default_max_tokens: u32) -> u64 {
    let prompt = request.prompt_chars().div_ceil(CHARS_PER_TOKEN) as u64;
    prompt + u64::from(request.max_tokens.unwrap_or(default_max_tokens))
}

/// Wraps an `ExecutionProvider` so every attempt passes through a shared
/// `SlidingWindowRateLimiter`.
pub struct RateLimitedProvider {
    inner: Arc<dyn ExecutionProvider>,
    limiter: Arc<SlidingWindowRateLimiter>,
    retry: ProviderRetryPolicy,
    default_max_tokens: u32,
}

impl RateLimitedProvider {
    /// Wraps `inner` so every call first takes capacity from `limiter`.
    pub fn new(
        inner: Arc<dyn ExecutionProvider>,
        limiter: Arc<SlidingWindowRateLimiter>,
        retry: ProviderRetryPolicy,
        default_max_tokens: u32,
    ) -> Self {
        Self {
            inner,
            limiter,
            retry,
            default_max_tokens,
        }
    }

    async fn attempt(
        &self,
        request: ExecutionRequest,
        callbacks: &dyn RunCallbacks,
    ) -> DomainResult<ExecutionOutcome> {
        let estimate = estimate_tokens(&request, self.default_max_tokens);
        let reservation = self.limiter.wait_for_capacity(estimate).await;
        let result = self.inner.execute(request, callbacks).await;
        // failures without usage keep their estimate
        if let Some(usage) = result.as_ref().ok().and_then(|o| o.tokens_used) {
            self.limiter.record_usage(reservation, usage.total()).await;
        }
        result
    }
}

/// Wrap every registered provider, each backend with its own limiter.
pub fn rate_limit_registry(registry: ProviderRegistry, config: &Config) -> ProviderRegistry {
    let settings = RateLimitSettings::from(&config.rate_limit);
    let retry = ProviderRetryPolicy::from(&config.retry);
    let max_tokens = config.provider.max_tokens;
    registry.wrap_all(|name, provider| {
        debug!(provider = name, "Rate limiting provider");
        Arc::new(RateLimitedProvider::new(
            provider,
            Arc::new(SlidingWindowRateLimiter::new(settings)),
            retry,
            max_tokens,
        ))
    })
}

#[async_trait]
impl ExecutionProvider for RateLimitedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn is_available(&self) -> DomainResult<bool> {
        self.inner.is_available().await
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        callbacks: &dyn RunCallbacks,
    ) -> DomainResult<ExecutionOutcome> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_backoff)
            .with_max_interval(self.retry.max_backoff)
            .with_max_elapsed_time(None)
            .build();
        let retries = AtomicU32::new(0);
        let step = request.step_key.clone();

        backoff::future::retry(policy, || {
            let request = request.clone();
            let retries = &retries;
            let step = step.as_deref();
            async move {
                match self.attempt(request, callbacks).await {
                    Ok(outcome) => Ok(outcome),
                    Err(err @ DomainError::ProviderUnavailable(_)) => {
                        let attempt = retries.fetch_add(1, Ordering::SeqCst);
                        if attempt >= self.retry.max_retries {
                            warn!(provider = self.inner.name(), error = %err, "Provider still unavailable, giving up");
                            return Err(backoff::Error::permanent(err));
                        }
                        debug!(provider = self.inner.name(), attempt = attempt + 1, error = %err, "Retrying provider call");
                        callbacks
                            .on_log(
                                LogLevel::Warn,
                                &format!("Provider unavailable, retrying ({}/{}): {err}", attempt + 1, self.retry.max_retries),
                                step,
                            )
                            .await;
                        Err(backoff::Error::transient(err))
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::{MockProvider, MockResponse};
    use crate::domain::models::{ExecutionContext, Stage};
    use crate::domain::ports::NoopCallbacks;
    use uuid::Uuid;

    fn request(user: &str) -> ExecutionRequest {
        ExecutionRequest::new(
            "12345678",
            user,
            ExecutionContext {
                run_id: Uuid::new_v4(),
                workspace_id: Uuid::new_v4(),
                card_id: Uuid::new_v4(),
                stage: Stage::Prd,
            },
        )
    }

    fn wrap(mock: Arc<MockProvider>, max_retries: u32) -> (RateLimitedProvider, Arc<SlidingWindowRateLimiter>) {
        let limiter = Arc::new(SlidingWindowRateLimiter::new(RateLimitSettings {
            max_requests: 10,
            max_tokens: 100_000,
            window: Duration::from_secs(60),
        }));
        let provider = RateLimitedProvider::new(
            mock,
            limiter.clone(),
            ProviderRetryPolicy {
                max_retries,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
            1000,
        );
        (provider, limiter)
    }

    #[test]
    fn test_estimate_rounds_up_and_adds_output_budget() {
        // 8 + 1 chars -> 3 tokens
        let req = request("a");
        assert_eq!(estimate_tokens(&req, 1000), 1003);
        assert_eq!(estimate_tokens(&req.with_max_tokens(10), 1000), 13);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let mock = Arc::new(MockProvider::new());
        mock.push_response(MockResponse::unavailable("529")).await;
        mock.push_response(MockResponse::success("done")).await;
        let (provider, limiter) = wrap(mock.clone(), 2);

        let outcome = provider.execute(request("go"), &NoopCallbacks).await.unwrap();
        assert_eq!(outcome.output_text(), "done");
        assert_eq!(mock.call_count().await, 2);
        // both attempts consumed a request slot
        assert_eq!(limiter.get_remaining().await.requests, 8);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let mock = Arc::new(MockProvider::with_default_response(MockResponse::unavailable("503")));
        let (provider, _) = wrap(mock.clone(), 2);

        let err = provider.execute(request("go"), &NoopCallbacks).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(mock.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_failed_outcome_is_not_retried() {
        let mock = Arc::new(MockProvider::with_default_response(MockResponse::failure("refused")));
        let (provider, limiter) = wrap(mock.clone(), 2);

        let outcome = provider.execute(request("go"), &NoopCallbacks).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(mock.call_count().await, 1);
        // mock failures carry no usage, so the estimate stays reserved
        assert_eq!(limiter.get_remaining().await.tokens, 100_000 - estimate_tokens(&request("go"), 1000));
    }
}
