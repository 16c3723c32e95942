//! Implementation of the `pipewright init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::adapters::sqlite::Migrator;
use crate::cli::context::Engine;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::CONFIG_DIR;

/// Arguments for `pipewright init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file with defaults
    #[arg(long, short)]
    pub force: bool,
}

/// Result of `pipewright init`.
#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    /// Always true when printed
    pub success: bool,
    /// Summary line
    pub message: String,
    /// Where the config lives
    pub config_path: PathBuf,
    /// Whether the config file was (re)written
    pub config_written: bool,
    /// Database file
    pub database_path: String,
    /// Applied schema version
    pub schema_version: i64,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if self.config_written {
            lines.push(format!("  Config written to {}", self.config_path.display()));
        }
        lines.push(format!(
            "  Database at {} (schema v{})",
            self.database_path, self.schema_version
        ));
        lines.join("\n")
    }
}

/// Create `.pipewright/`, write the config and migrate the database.
pub async fn execute(args: InitArgs, config: &Config, json_mode: bool) -> Result<()> {
    let config_dir = PathBuf::from(CONFIG_DIR);
    fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;

    let config_path = config_dir.join("config.yaml");
    let config_written = args.force || !config_path.exists();
    if config_written {
        // keys stay in the environment
        let mut on_disk = config.clone();
        on_disk.provider.anthropic.api_key = None;
        let yaml = serde_yaml::to_string(&on_disk).context("Failed to render config")?;
        fs::write(&config_path, yaml)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }

    let engine = Engine::open(config.clone()).await?;
    let schema_version = Migrator::new(engine.pool.clone())
        .get_current_version()
        .await
        .context("Failed to read schema version")?;
    engine.pool.close().await;

    output(
        &InitOutput {
            success: true,
            message: "Pipewright initialized.".to_string(),
            config_path,
            config_written,
            database_path: config.database.path.clone(),
            schema_version,
        },
        json_mode,
    );
    Ok(())
}
