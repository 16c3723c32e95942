//! `pipewright worker` commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use uuid::Uuid;

use crate::cli::context::Engine;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

/// `pipewright worker` subcommands.
#[derive(Subcommand, Debug)]
pub enum WorkerCommands {
    /// Start a worker and run until interrupted (Ctrl-C)
    Run {
        /// Only take runs of this workspace
        #[arg(short, long)]
        workspace: Option<Uuid>,

        /// Maximum runs executing at once
        #[arg(short, long)]
        max_concurrent: Option<usize>,

        /// Leave cards where they are even when a run recommends advancing
        #[arg(long)]
        no_auto_advance: bool,
    },
}

#[derive(Debug, Serialize)]
struct WorkerStopped {
    worker_id: String,
    drained: bool,
}

impl CommandOutput for WorkerStopped {
    fn to_human(&self) -> String {
        if self.drained {
            format!("Worker {} stopped.", self.worker_id)
        } else {
            format!(
                "Worker {} stopped with runs still executing; the rescue sweep will recover them.",
                self.worker_id
            )
        }
    }
}

/// Run a worker until Ctrl-C.
pub async fn execute(command: WorkerCommands, mut config: Config, json_mode: bool) -> Result<()> {
    match command {
        WorkerCommands::Run {
            workspace,
            max_concurrent,
            no_auto_advance,
        } => {
            if workspace.is_some() {
                config.worker.workspace_id = workspace;
            }
            if let Some(max) = max_concurrent {
                config.worker.max_concurrent = max.max(1);
            }
            if no_auto_advance {
                config.worker.apply_auto_advance = false;
            }

            let engine = Engine::open(config).await?;
            let worker = engine.worker()?;
            worker.start().await.context("Failed to start worker")?;
            if !json_mode {
                eprintln!("Worker {} running. Press Ctrl-C to stop.", worker.id());
            }

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            if !json_mode {
                eprintln!("Stopping worker {}...", worker.id());
            }

            let drained = worker.stop().await.context("Failed to stop worker")?;
            output(
                &WorkerStopped {
                    worker_id: worker.id().to_string(),
                    drained,
                },
                json_mode,
            );
            Ok(())
        }
    }
}
