//! Source-control write-back adapters.

pub mod git_cli;
pub mod noop;

use std::sync::Arc;

pub use git_cli::GitCliSourceControl;
pub use noop::NoopSourceControl;

use crate::domain::models::SourceControlConfig;
use crate::domain::ports::SourceControl;

/// Git write-back when enabled, otherwise a no-op.
pub fn from_config(config: &SourceControlConfig) -> Arc<dyn SourceControl> {
    if config.enabled {
        Arc::new(GitCliSourceControl::new(config))
    } else {
        Arc::new(NoopSourceControl)
    }
}
