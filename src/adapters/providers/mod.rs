//! Execution provider implementations.

pub mod anthropic_api;
pub mod claude_cli;
pub mod mock;
pub mod registry;

pub use anthropic_api::{AnthropicApiConfig, AnthropicApiProvider};
pub use claude_cli::{ClaudeCliConfig, ClaudeCliProvider};
pub use mock::{MockProvider, MockResponse};
pub use registry::ProviderRegistry;
