//! Domain layer for the stage-run engine
//!
//! Core models, error types and the port traits adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
