//! Infrastructure adapters for external systems.

pub mod personas;
pub mod providers;
pub mod source_control;
pub mod sqlite;
