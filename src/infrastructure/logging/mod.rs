//! Logging infrastructure
//!
//! Process logs through tracing and tracing-subscriber, as JSON or pretty
//! text on stderr with an optional rolling JSON file. Per-run audit logs are
//! separate and live in the store.

pub mod config;
pub mod logger;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
