//! Worker liveness records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a worker process reports it is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Waiting for work
    #[default]
    Idle,
    /// Executing at least one run
    Processing,
}

impl WorkerStatus {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
        }
    }

    /// Parse a stored status.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "processing" | "busy" => Some(Self::Processing),
            _ => None,
        }
    }
}

/// One row per live worker process.
///
/// Only the owning worker mutates its row, except for rescue and cleanup
/// sweeps acting on stale rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    /// Worker id
    pub worker_id: String,
    /// Workspace the worker serves, `None` for all
    pub workspace_id: Option<Uuid>,
    /// Last write of this row
    pub last_heartbeat: DateTime<Utc>,
    /// Idle or processing
    pub status: WorkerStatus,
    /// A run the worker is executing
    pub active_run_id: Option<Uuid>,
    /// Runs that succeeded
    pub processed_count: u64,
    /// Runs that failed
    pub failed_count: u64,
    /// When the worker registered
    pub started_at: DateTime<Utc>,
}

impl WorkerHeartbeat {
    /// Fresh idle heartbeat.
    pub fn new(worker_id: impl Into<String>, workspace_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            worker_id: worker_id.into(),
            workspace_id,
            last_heartbeat: now,
            status: WorkerStatus::Idle,
            active_run_id: None,
            processed_count: 0,
            failed_count: 0,
            started_at: now,
        }
    }

    /// Whether the heartbeat is newer than `threshold` relative to `now`.
    pub fn is_live(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.last_heartbeat < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_window() {
        let mut hb = WorkerHeartbeat::new("w-1", None);
        let now = Utc::now();
        hb.last_heartbeat = now - chrono::Duration::seconds(30);
        assert!(hb.is_live(now, chrono::Duration::seconds(60)));
        hb.last_heartbeat = now - chrono::Duration::seconds(90);
        assert!(!hb.is_live(now, chrono::Duration::seconds(60)));
    }
}
