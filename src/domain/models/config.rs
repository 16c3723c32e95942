//! Engine configuration model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recipe::VerificationStrictness;

/// Main configuration structure for Pipewright
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Provider call rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Run retry and provider backoff policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Worker loop timings and liveness thresholds
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Execution provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Verification engine settings
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Document write-back to a git working tree
    #[serde(default)]
    pub source_control: SourceControlConfig,

    /// Persona panel for the validate-stage jury
    #[serde(default)]
    pub jury: JuryConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".pipewright/pipewright.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Sliding-window caps for outbound provider calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Calls admitted per window
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Tokens (estimated, then actual) admitted per window
    #[serde(default = "default_tokens_per_minute")]
    pub tokens_per_minute: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

const fn default_requests_per_minute() -> u32 {
    50
}

const fn default_tokens_per_minute() -> u64 {
    80_000
}

const fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            tokens_per_minute: default_tokens_per_minute(),
            window_secs: default_window_secs(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Highest attempt number a run may reach through retries
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// In-call retries for transient provider failures
    #[serde(default = "default_provider_max_retries")]
    pub provider_max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_provider_max_retries() -> u32 {
    2
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            provider_max_retries: default_provider_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Worker loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Delay between queue polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay between heartbeat writes
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Delay between stuck-run sweeps
    #[serde(default = "default_rescue_interval_ms")]
    pub rescue_interval_ms: u64,

    /// Concurrent executions per worker process
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Bounded drain wait on stop
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Only poll runs of this workspace
    #[serde(default)]
    pub workspace_id: Option<Uuid>,

    /// Heartbeats older than this are not live
    #[serde(default = "default_stale_worker_secs")]
    pub stale_worker_secs: u64,

    /// Running runs older than this without a live heartbeat are rescued
    #[serde(default = "default_stuck_run_secs")]
    pub stuck_run_secs: u64,

    /// Move the card when an autonomous run recommends advancing
    #[serde(default = "default_apply_auto_advance")]
    pub apply_auto_advance: bool,
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

const fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

const fn default_rescue_interval_ms() -> u64 {
    60_000
}

const fn default_max_concurrent() -> usize {
    2
}

const fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

const fn default_stale_worker_secs() -> u64 {
    60
}

const fn default_stuck_run_secs() -> u64 {
    300
}

const fn default_apply_auto_advance() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            rescue_interval_ms: default_rescue_interval_ms(),
            max_concurrent: default_max_concurrent(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            workspace_id: None,
            stale_worker_secs: default_stale_worker_secs(),
            stuck_run_secs: default_stuck_run_secs(),
            apply_auto_advance: default_apply_auto_advance(),
        }
    }
}

/// Execution provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderConfig {
    /// Provider used when a run names none
    #[serde(default = "default_provider")]
    pub default: String,

    /// Output token budget per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Anthropic Messages API provider
    #[serde(default)]
    pub anthropic: AnthropicProviderConfig,

    /// Local `claude` CLI provider
    #[serde(default)]
    pub claude_cli: ClaudeCliProviderConfig,
}

fn default_provider() -> String {
    "anthropic-api".to_string()
}

const fn default_max_tokens() -> u32 {
    4096
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            max_tokens: default_max_tokens(),
            anthropic: AnthropicProviderConfig::default(),
            claude_cli: ClaudeCliProviderConfig::default(),
        }
    }
}

/// Anthropic Messages API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnthropicProviderConfig {
    /// API key (can also be set via ANTHROPIC_API_KEY env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model id sent with every request
    #[serde(default = "default_anthropic_model")]
    pub model: String,

    /// Base URL for API (for testing/proxies)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

const fn default_request_timeout() -> u64 {
    300
}

impl Default for AnthropicProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_anthropic_model(),
            base_url: None,
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Local claude CLI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClaudeCliProviderConfig {
    /// Path to claude CLI executable
    #[serde(default = "default_claude_path")]
    pub claude_path: String,

    /// Working directory for claude execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Per-invocation timeout
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_claude_path() -> String {
    "claude".to_string()
}

impl Default for ClaudeCliProviderConfig {
    fn default() -> Self {
        Self {
            claude_path: default_claude_path(),
            working_dir: None,
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Verification engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VerificationConfig {
    /// Characters of each document included in AI-adjudicated checks
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// Strictness applied when a recipe does not set one
    #[serde(default)]
    pub default_strictness: VerificationStrictness,
}

const fn default_excerpt_chars() -> usize {
    4_000
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            excerpt_chars: default_excerpt_chars(),
            default_strictness: VerificationStrictness::default(),
        }
    }
}

/// Git write-back settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceControlConfig {
    /// Commit generated documents with git
    #[serde(default)]
    pub enabled: bool,

    /// Working tree that receives generated documents
    #[serde(default = "default_repo_path")]
    pub repo_path: String,

    /// Directory inside the working tree for documents
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,

    /// Commit author name
    #[serde(default = "default_author_name")]
    pub author_name: String,

    /// Commit author email
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

fn default_repo_path() -> String {
    ".".to_string()
}

fn default_docs_dir() -> String {
    "docs".to_string()
}

fn default_author_name() -> String {
    "pipewright".to_string()
}

fn default_author_email() -> String {
    "pipewright@localhost".to_string()
}

impl Default for SourceControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repo_path: default_repo_path(),
            docs_dir: default_docs_dir(),
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

/// Persona panel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JuryConfig {
    /// Directory holding `generated/batch-*/` and `seeds/`; no panel when unset
    #[serde(default)]
    pub personas_dir: Option<String>,

    /// Personas drawn per jury evaluation
    #[serde(default = "default_jury_size")]
    pub jury_size: usize,

    /// Minimum share of skeptics on a panel
    #[serde(default = "default_skeptic_minimum")]
    pub skeptic_minimum: f64,
}

const fn default_jury_size() -> usize {
    20
}

const fn default_skeptic_minimum() -> f64 {
    0.15
}

impl Default for JuryConfig {
    fn default() -> Self {
        Self {
            personas_dir: None,
            jury_size: default_jury_size(),
            skeptic_minimum: default_skeptic_minimum(),
        }
    }
}
