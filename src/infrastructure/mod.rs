//! Infrastructure layer module
//!
//! Process-level concerns shared by every entry point:
//! - Configuration loading and validation (figment)
//! - Logging setup (tracing-subscriber, tracing-appender)

pub mod config;
pub mod logging;
