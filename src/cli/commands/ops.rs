//! `pipewright ops` commands.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use uuid::Uuid;

use crate::cli::context::Engine;
use crate::cli::output::{format_time, list_table, output, render_list, CommandOutput};
use crate::domain::models::{PersonaStats, WorkerHeartbeat};
use crate::services::{HealthReport, RescueReport};

/// `pipewright ops` subcommands.
#[derive(Subcommand, Debug)]
pub enum OpsCommands {
    /// Worker and queue health
    Health {
        #[arg(short, long)]
        workspace: Option<Uuid>,
    },
    /// Fail stuck runs and release their cards now
    Rescue,
    /// Delete heartbeat rows of long-dead workers
    Cleanup,
    /// List worker heartbeats
    Workers,
    /// Draw a sample jury panel and show its make-up
    Personas {
        /// Seed for the draw; the same seed draws the same panel
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

impl CommandOutput for HealthReport {
    fn to_human(&self) -> String {
        let state = if self.stalled { "STALLED" } else { "ok" };
        format!(
            "Health: {state}\n  Active workers: {}\n  Queued runs:    {}\n  Running runs:   {}",
            self.active_workers, self.queued_runs, self.running_runs
        )
    }
}

impl CommandOutput for RescueReport {
    fn to_human(&self) -> String {
        if self.rescued_runs.is_empty() {
            return "No stuck runs.".to_string();
        }
        let mut lines = vec![format!(
            "Rescued {} run(s), unlocked {} card(s):",
            self.rescued_runs.len(),
            self.unlocked_cards.len()
        )];
        lines.extend(self.rescued_runs.iter().map(|id| format!("  run  {id}")));
        lines.extend(self.unlocked_cards.iter().map(|id| format!("  card {id}")));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct CleanupOutput {
    removed: u64,
}

impl CommandOutput for CleanupOutput {
    fn to_human(&self) -> String {
        format!("Removed {} stale worker row(s).", self.removed)
    }
}

#[derive(Debug, Serialize)]
struct WorkerListOutput {
    workers: Vec<WorkerHeartbeat>,
    total: usize,
}

impl CommandOutput for WorkerListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["worker", "status", "active run", "done", "failed", "heartbeat"]);
        for worker in &self.workers {
            table.add_row(vec![
                worker.worker_id.clone(),
                worker.status.as_str().to_string(),
                worker
                    .active_run_id
                    .map_or_else(|| "-".to_string(), |id| id.to_string()),
                worker.processed_count.to_string(),
                worker.failed_count.to_string(),
                format_time(worker.last_heartbeat),
            ]);
        }
        render_list("worker", &table, self.total)
    }
}

#[derive(Debug, Serialize)]
struct PanelOutput {
    jury_size: usize,
    skeptic_minimum: f64,
    stats: PersonaStats,
}

impl CommandOutput for PanelOutput {
    fn to_human(&self) -> String {
        if self.stats.total == 0 {
            return "No personas available. Set jury.personas_dir to a directory with seeds/ or generated/.".to_string();
        }
        let mut lines = vec![format!(
            "Panel of {} (target {}, skeptic minimum {:.0}%)",
            self.stats.total,
            self.jury_size,
            self.skeptic_minimum * 100.0
        )];
        for (title, buckets) in [("By archetype", &self.stats.by_archetype), ("By AI adoption", &self.stats.by_adoption)] {
            let mut table = list_table(&["bucket", "count", "percent"]);
            for (bucket, share) in buckets {
                table.add_row(vec![bucket.clone(), share.count.to_string(), format!("{:.1}%", share.percent)]);
            }
            lines.push(format!("\n{title}:\n{table}"));
        }
        lines.join("\n")
    }
}

/// Run an ops subcommand.
pub async fn execute(command: OpsCommands, engine: &Engine, json_mode: bool) -> Result<()> {
    let ops = engine.operations();
    match command {
        OpsCommands::Health { workspace } => output(&ops.health(workspace).await?, json_mode),
        OpsCommands::Rescue => output(&ops.rescue().await?, json_mode),
        OpsCommands::Cleanup => output(
            &CleanupOutput {
                removed: ops.cleanup().await?,
            },
            json_mode,
        ),
        OpsCommands::Workers => {
            let workers = ops.workers().await?;
            let total = workers.len();
            output(&WorkerListOutput { workers, total }, json_mode);
        }
        OpsCommands::Personas { seed } => {
            let jury = engine.jury();
            let panel = jury.assemble(seed).await?;
            let settings = jury.settings();
            output(
                &PanelOutput {
                    jury_size: settings.jury_size,
                    skeptic_minimum: settings.skeptic_minimum,
                    stats: PersonaStats::of(&panel),
                },
                json_mode,
            );
        }
    }
    Ok(())
}
