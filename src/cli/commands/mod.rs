//! CLI command implementations.

pub mod init;
pub mod ops;
pub mod recipe;
pub mod run;
pub mod worker;
