//! Append-only run log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a run log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Diagnostics
    Debug,
    /// Progress
    #[default]
    Info,
    /// Something worth a look
    Warn,
    /// A failure
    Error,
}

impl LogLevel {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parse a stored level.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" | "trace" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A single line in a run's audit log. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    /// Run the line belongs to
    pub run_id: Uuid,
    /// When it was written
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Text
    pub message: String,
    /// Step that produced the line (e.g. `generate:prd`, `verify:task-1`)
    pub step_key: Option<String>,
}

impl RunLog {
    /// Log line stamped now.
    pub fn new(run_id: Uuid, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            level,
            message: message.into(),
            step_key: None,
        }
    }

    /// Tag the line with a step key.
    pub fn with_step(mut self, step_key: impl Into<String>) -> Self {
        self.step_key = Some(step_key.into());
        self
    }
}
