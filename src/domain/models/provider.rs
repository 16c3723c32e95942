//! Execution provider request and outcome types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage_run::Stage;

/// Identifies the run a provider call belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Run being executed
    pub run_id: Uuid,
    /// Workspace of the run
    pub workspace_id: Uuid,
    /// Card of the run
    pub card_id: Uuid,
    /// Stage being executed
    pub stage: Stage,
}

/// One generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Instructions for the model
    pub system_prompt: String,
    /// The task itself
    pub user_prompt: String,
    /// Run the call belongs to
    pub context: ExecutionContext,
    /// Output token budget; provider default when unset
    pub max_tokens: Option<u32>,
    /// Short label used as the log step key (e.g. `generate:prd`)
    pub step_key: Option<String>,
}

impl ExecutionRequest {
    /// Request with the default token budget.
    pub fn new(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            context,
            max_tokens: None,
            step_key: None,
        }
    }

    /// Cap output tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Tag the request with a step key for logs.
    pub fn with_step_key(mut self, step_key: impl Into<String>) -> Self {
        self.step_key = Some(step_key.into());
        self
    }

    /// Characters across both prompts.
    pub fn prompt_chars(&self) -> usize {
        self.system_prompt.chars().count() + self.user_prompt.chars().count()
    }
}

/// Input/output token counts reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input: u64,
    /// Completion tokens
    pub output: u64,
}

impl TokenUsage {
    /// Usage from raw counts.
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Input plus output.
    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    /// Accumulate another call.
    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// Result of a provider call. `success=false` is a model-level failure, as
/// opposed to a transport error surfaced through `DomainError`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Whether the model produced usable output
    pub success: bool,
    /// Generated text
    pub output: Option<String>,
    /// Model-level failure message
    pub error: Option<String>,
    /// Token usage when the provider reports it
    pub tokens_used: Option<TokenUsage>,
    /// Wall-clock time of the call
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    /// Successful outcome.
    pub fn succeeded(output: impl Into<String>, tokens_used: Option<TokenUsage>, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            tokens_used,
            duration_ms,
        }
    }

    /// Model-level failure.
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            tokens_used: None,
            duration_ms,
        }
    }

    /// Output text, empty when there is none.
    pub fn output_text(&self) -> &str {
        self.output.as_deref().unwrap_or_default()
    }
}
