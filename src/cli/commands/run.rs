//! `pipewright run` commands.

use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use serde::Serialize;
use uuid::Uuid;

use crate::cli::context::Engine;
use crate::cli::output::{format_optional_time, format_time, list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::{Artifact, AutomationLevel, RunLog, Stage, StageRun};
use crate::services::CreateRunRequest;

/// `pipewright run` subcommands.
#[derive(Subcommand, Debug)]
pub enum RunCommands {
    /// Queue a run for a card (returns the active run if one exists)
    Create {
        /// Card ID
        card_id: Uuid,

        /// Stage to run (defaults to the card's current stage)
        #[arg(short, long)]
        stage: Option<String>,

        /// manual, assisted or autonomous
        #[arg(short, long, default_value = "manual")]
        automation: String,

        /// Provider name (defaults to the configured provider)
        #[arg(short, long)]
        provider: Option<String>,

        /// Recorded as the run's trigger
        #[arg(long, default_value = "cli")]
        triggered_by: String,
    },

    /// Queue the next attempt of a failed or cancelled run
    Retry {
        run_id: Uuid,

        #[arg(long, default_value = "cli")]
        triggered_by: String,
    },

    /// Cancel a queued or running run
    Cancel {
        run_id: Uuid,

        #[arg(short, long, default_value = "Cancelled by user")]
        reason: String,
    },

    /// Show a run with its artifacts
    Show { run_id: Uuid },

    /// List runs
    List {
        /// Runs of one card
        #[arg(long, conflicts_with = "workspace")]
        card: Option<Uuid>,

        /// Recent runs of a workspace
        #[arg(short, long)]
        workspace: Option<Uuid>,

        /// Only queued runs, oldest first
        #[arg(short, long)]
        queued: bool,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print a run's log
    Logs { run_id: Uuid },
}

/// One run with its artifacts.
#[derive(Debug, Serialize)]
pub struct RunOutput {
    /// The run
    pub run: StageRun,
    /// Artifacts recorded for it
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let run = &self.run;
        let mut lines = vec![
            format!("Run:         {}", run.id),
            format!("Card:        {}", run.card_id),
            format!("Workspace:   {}", run.workspace_id),
            format!("Stage:       {}", run.stage),
            format!("Status:      {}", run.status),
            format!("Automation:  {}", run.automation_level.as_str()),
            format!("Provider:    {}", run.provider),
            format!("Attempt:     {}", run.attempt),
            format!("Triggered:   {}", run.triggered_by),
            format!("Created:     {}", format_time(run.created_at)),
            format!("Started:     {}", format_optional_time(run.started_at)),
            format!("Finished:    {}", format_optional_time(run.finished_at)),
        ];
        if let Some(worker) = &run.claimed_by {
            lines.push(format!("Claimed by:  {worker}"));
        }
        if let Some(error) = &run.error_summary {
            lines.push(format!("Error:       {error}"));
        }
        if let Some(advance) = run.metadata.get("autoAdvance") {
            lines.push(format!("Advance:     {advance}"));
        }
        if !self.artifacts.is_empty() {
            lines.push(String::new());
            lines.push("Artifacts:".to_string());
            for artifact in &self.artifacts {
                let uri = artifact.uri.as_deref().unwrap_or("-");
                lines.push(format!("  [{}] {} ({uri})", artifact.artifact_type, artifact.label));
            }
        }
        lines.join("\n")
    }
}

/// A page of runs.
#[derive(Debug, Serialize)]
pub struct RunListOutput {
    /// Runs, newest first
    pub runs: Vec<StageRun>,
    /// Number of runs shown
    pub total: usize,
}

impl CommandOutput for RunListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "card", "stage", "status", "attempt", "created", "error"]);
        for run in &self.runs {
            table.add_row(vec![
                run.id.to_string(),
                run.card_id.simple().to_string().chars().take(8).collect::<String>(),
                run.stage.to_string(),
                run.status.to_string(),
                run.attempt.to_string(),
                format_time(run.created_at),
                truncate(run.error_summary.as_deref().unwrap_or(""), 40),
            ]);
        }
        render_list("run", &table, self.total)
    }
}

/// Log lines of a run.
#[derive(Debug, Serialize)]
pub struct RunLogsOutput {
    /// The run
    pub run_id: Uuid,
    /// Lines in timestamp order
    pub logs: Vec<RunLog>,
}

impl CommandOutput for RunLogsOutput {
    fn to_human(&self) -> String {
        if self.logs.is_empty() {
            return format!("No log lines for run {}.", self.run_id);
        }
        self.logs
            .iter()
            .map(|log| {
                let step = log
                    .step_key
                    .as_deref()
                    .map(|s| format!(" [{s}]"))
                    .unwrap_or_default();
                format!(
                    "{} {:<5}{step} {}",
                    log.timestamp.format("%H:%M:%S%.3f"),
                    log.level.as_str().to_uppercase(),
                    log.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of a cancel request.
#[derive(Debug, Serialize)]
pub struct CancelOutput {
    /// The run
    pub run_id: Uuid,
    /// False when it had already finished
    pub cancelled: bool,
}

impl CommandOutput for CancelOutput {
    fn to_human(&self) -> String {
        if self.cancelled {
            format!("Run {} cancelled.", self.run_id)
        } else {
            format!("Run {} already finished; nothing to cancel.", self.run_id)
        }
    }
}

/// Run a `run` subcommand.
pub async fn execute(command: RunCommands, engine: &Engine, json_mode: bool) -> Result<()> {
    match command {
        RunCommands::Create {
            card_id,
            stage,
            automation,
            provider,
            triggered_by,
        } => {
            let card = engine
                .cards
                .get_card(card_id)
                .await?
                .ok_or_else(|| anyhow!("Card not found: {card_id}"))?;
            let stage = match stage {
                Some(s) => Stage::from_str(&s).ok_or_else(|| anyhow!("Unknown stage: {s}"))?,
                None => card.stage,
            };
            let automation_level = AutomationLevel::from_str(&automation)
                .ok_or_else(|| anyhow!("Unknown automation level: {automation}"))?;

            let mut request = CreateRunRequest::new(card.id, card.workspace_id, stage, triggered_by)
                .with_automation_level(automation_level);
            if let Some(provider) = provider {
                request = request.with_provider(provider);
            }
            let run = engine.runs.create_run(request).await.context("Failed to create run")?;
            output(&RunOutput { run, artifacts: vec![] }, json_mode);
        }

        RunCommands::Retry { run_id, triggered_by } => {
            let run = engine
                .runs
                .retry_run(run_id, &triggered_by)
                .await
                .context("Failed to retry run")?;
            output(&RunOutput { run, artifacts: vec![] }, json_mode);
        }

        RunCommands::Cancel { run_id, reason } => {
            let cancelled = engine.runs.cancel_run(run_id, &reason).await?;
            output(&CancelOutput { run_id, cancelled }, json_mode);
        }

        RunCommands::Show { run_id } => {
            let run = engine.runs.get_run(run_id).await?;
            let artifacts = engine.runs.list_artifacts(run_id).await?;
            output(&RunOutput { run, artifacts }, json_mode);
        }

        RunCommands::List {
            card,
            workspace,
            queued,
            limit,
        } => {
            let runs = if queued {
                engine.runs.list_queued_runs(workspace, limit).await?
            } else if let Some(card_id) = card {
                let mut runs = engine.runs.list_runs_for_card(card_id).await?;
                runs.truncate(limit);
                runs
            } else if let Some(workspace_id) = workspace {
                engine.runs.list_recent_runs(workspace_id, limit).await?
            } else {
                bail!("Pass --card, --workspace or --queued");
            };
            let total = runs.len();
            output(&RunListOutput { runs, total }, json_mode);
        }

        RunCommands::Logs { run_id } => {
            // Surface a clear not-found instead of an empty log.
            engine.runs.get_run(run_id).await?;
            let logs = engine.runs.list_logs(run_id).await?;
            output(&RunLogsOutput { run_id, logs }, json_mode);
        }
    }
    Ok(())
}
