//! Claude CLI execution provider.
//!
//! Spawns the `claude` command-line tool in print mode and reads its
//! stream-json output line by line.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ClaudeCliProviderConfig, ExecutionOutcome, ExecutionRequest, LogLevel, TokenUsage,
};
use crate::domain::ports::{ExecutionProvider, RunCallbacks};

/// Registry name of this provider.
pub const PROVIDER_NAME: &str = "claude-cli";

/// Claude CLI provider configuration.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    /// Path to claude CLI binary
    pub binary_path: String,
    /// Working directory for the child process
    pub working_dir: Option<String>,
    /// Kill the child after this long
    pub timeout_secs: u64,
    /// Additional CLI flags
    pub extra_flags: Vec<String>,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            binary_path: "claude".to_string(),
            working_dir: None,
            timeout_secs: 300,
            extra_flags: vec![],
        }
    }
}

impl From<&ClaudeCliProviderConfig> for ClaudeCliConfig {
    fn from(settings: &ClaudeCliProviderConfig) -> Self {
        Self {
            binary_path: settings.claude_path.clone(),
            working_dir: settings.working_dir.clone(),
            timeout_secs: settings.timeout_secs,
            extra_flags: vec![],
        }
    }
}

/// One parsed line of stream-json output.
#[derive(Debug, Clone, PartialEq)]
enum CliEvent {
    Text(String),
    Usage(TokenUsage),
    Result {
        text: String,
        usage: Option<TokenUsage>,
        is_error: bool,
    },
    Error(String),
    Status(String),
}

fn usage_from(value: &Value) -> Option<TokenUsage> {
    let input = value.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output = value.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
    (input > 0 || output > 0).then(|| TokenUsage::new(input, output))
}

/// Text of an `assistant` event: either a bare string or a message with
/// content blocks.
fn assistant_text(json: &Value) -> Option<String> {
    if let Some(text) = json.get("content").or_else(|| json.get("text")).and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let blocks = json.get("message")?.get("content")?.as_array()?;
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then(|| text.join(""))
}

fn parse_line(line: &str) -> Option<CliEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Ok(json) = serde_json::from_str::<Value>(trimmed) else {
        return Some(CliEvent::Text(line.to_string()));
    };

    match json.get("type").and_then(Value::as_str)? {
        "assistant" | "text" => assistant_text(&json).map(CliEvent::Text),
        "usage" | "message_delta" => usage_from(json.get("usage").unwrap_or(&json)).map(CliEvent::Usage),
        "result" => Some(CliEvent::Result {
            text: json
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            usage: json.get("usage").and_then(usage_from),
            is_error: json.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        }),
        "error" => Some(CliEvent::Error(
            json.get("error")
                .and_then(|e| e.get("message"))
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string(),
        )),
        "system" | "status" => json
            .get("message")
            .or_else(|| json.get("subtype"))
            .and_then(Value::as_str)
            .map(|m| CliEvent::Status(m.to_string())),
        _ => None,
    }
}

/// Claude CLI provider.
pub struct ClaudeCliProvider {
    config: ClaudeCliConfig,
}

impl ClaudeCliProvider {
    /// Provider running the configured executable.
    pub fn new(config: ClaudeCliConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, request: &ExecutionRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];

        if !request.system_prompt.is_empty() {
            args.push("--system-prompt".to_string());
            args.push(request.system_prompt.clone());
        }

        args.extend(self.config.extra_flags.clone());

        args.push("-p".to_string());
        args.push(request.user_prompt.clone());
        args
    }

    async fn run_process(
        &self,
        request: &ExecutionRequest,
        callbacks: &dyn RunCallbacks,
    ) -> DomainResult<ExecutionOutcome> {
        let started = Instant::now();
        let step = request.step_key.as_deref();

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.args(self.build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("PIPEWRIGHT_RUN_ID", request.context.run_id.to_string());
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            DomainError::ProviderUnavailable(format!("Failed to spawn {}: {e}", self.config.binary_path))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DomainError::ExecutionFailed("Failed to capture stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DomainError::ExecutionFailed("Failed to capture stderr".to_string()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut streamed = String::new();
        let mut result_text: Option<String> = None;
        let mut usage = TokenUsage::default();
        let mut final_usage: Option<TokenUsage> = None;
        let mut errors: Vec<String> = vec![];
        let mut result_is_error = false;

        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_line(&line) {
                Some(CliEvent::Text(text)) => streamed.push_str(&text),
                Some(CliEvent::Usage(u)) => usage.add(u),
                Some(CliEvent::Result { text, usage: u, is_error }) => {
                    result_text = Some(text);
                    final_usage = u;
                    result_is_error = is_error;
                }
                Some(CliEvent::Error(message)) => {
                    callbacks.on_log(LogLevel::Error, &message, step).await;
                    errors.push(message);
                }
                Some(CliEvent::Status(message)) => {
                    callbacks.on_log(LogLevel::Debug, &message, step).await;
                }
                None => {}
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DomainError::ExecutionFailed(format!("Failed to wait for process: {e}")))?;
        let stderr_text = stderr_task.await.unwrap_or_default();
        let elapsed = started.elapsed().as_millis() as u64;
        let tokens = final_usage.or((usage.total() > 0).then_some(usage));

        if !status.success() || result_is_error {
            let mut message = errors.join("; ");
            if message.is_empty() {
                message = result_text.unwrap_or_else(|| stderr_text.trim().to_string());
            }
            if message.is_empty() {
                message = format!("claude exited with {status}");
            }
            let mut outcome = ExecutionOutcome::failed(message, elapsed);
            outcome.tokens_used = tokens;
            return Ok(outcome);
        }

        callbacks.on_progress(1.0, Some("generation complete")).await;
        let output = result_text.filter(|t| !t.is_empty()).unwrap_or(streamed);
        Ok(ExecutionOutcome::succeeded(output, tokens, elapsed))
    }
}

impl Default for ClaudeCliProvider {
    fn default() -> Self {
        Self::new(ClaudeCliConfig::default())
    }
}

#[async_trait]
impl ExecutionProvider for ClaudeCliProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn is_available(&self) -> DomainResult<bool> {
        let output = Command::new(&self.config.binary_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Ok(output.map(|out| out.status.success()).unwrap_or(false))
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        callbacks: &dyn RunCallbacks,
    ) -> DomainResult<ExecutionOutcome> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(timeout, self.run_process(&request, callbacks)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::ProviderUnavailable(format!(
                "claude did not finish within {}s",
                self.config.timeout_secs
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ExecutionContext, Stage};
    use crate::domain::ports::NoopCallbacks;
    use uuid::Uuid;

    fn request() -> ExecutionRequest {
        ExecutionRequest::new(
            "system",
            "user prompt",
            ExecutionContext {
                run_id: Uuid::new_v4(),
                workspace_id: Uuid::new_v4(),
                card_id: Uuid::new_v4(),
                stage: Stage::Discovery,
            },
        )
    }

    #[test]
    fn test_parse_assistant_message_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello "},{"type":"tool_use","id":"t"},{"type":"text","text":"world"}]}}"#;
        assert_eq!(parse_line(line), Some(CliEvent::Text("Hello world".into())));
    }

    #[test]
    fn test_parse_result_with_usage() {
        let line = r##"{"type":"result","subtype":"success","is_error":false,"result":"# Research","usage":{"input_tokens":40,"output_tokens":9}}"##;
        assert_eq!(
            parse_line(line),
            Some(CliEvent::Result {
                text: "# Research".into(),
                usage: Some(TokenUsage::new(40, 9)),
                is_error: false
            })
        );
    }

    #[test]
    fn test_parse_plain_and_unknown_lines() {
        assert_eq!(parse_line("not json"), Some(CliEvent::Text("not json".into())));
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line(r#"{"type":"ping"}"#), None);
        assert_eq!(
            parse_line(r#"{"type":"error","error":{"message":"boom"}}"#),
            Some(CliEvent::Error("boom".into()))
        );
    }

    #[test]
    fn test_args_end_with_prompt() {
        let provider = ClaudeCliProvider::default();
        let args = provider.build_args(&request());
        assert_eq!(args[0], "--print");
        assert!(args.windows(2).any(|w| w[0] == "--system-prompt" && w[1] == "system"));
        assert_eq!(&args[args.len() - 2..], &["-p".to_string(), "user prompt".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let provider = ClaudeCliProvider::new(ClaudeCliConfig {
            binary_path: "/nonexistent/claude-binary".into(),
            ..ClaudeCliConfig::default()
        });
        assert!(!provider.is_available().await.unwrap());
        let err = provider.execute(request(), &NoopCallbacks).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_fake_cli_script() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-claude");
        let mut file = std::fs::File::create(&script).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(
            file,
            r#"echo '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"partial"}}]}}}}'"#
        )
        .unwrap();
        writeln!(
            file,
            r#"echo '{{"type":"result","is_error":false,"result":"final text","usage":{{"input_tokens":5,"output_tokens":7}}}}'"#
        )
        .unwrap();
        drop(file);
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let provider = ClaudeCliProvider::new(ClaudeCliConfig {
            binary_path: script.to_string_lossy().into_owned(),
            ..ClaudeCliConfig::default()
        });
        let outcome = provider.execute(request(), &NoopCallbacks).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output_text(), "final text");
        assert_eq!(outcome.tokens_used, Some(TokenUsage::new(5, 7)));
    }
}
