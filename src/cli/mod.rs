//! Command-line interface.

pub mod commands;
pub mod context;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use context::Engine;

/// Top-level arguments.
#[derive(Parser, Debug)]
#[command(name = "pipewright")]
#[command(about = "Pipewright - durable stage-run execution engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Explicit configuration file (defaults to .pipewright/config.yaml)
    #[arg(short, long, global = true, env = "PIPEWRIGHT_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the config directory and database
    Init(commands::init::InitArgs),

    /// Run a worker process
    #[command(subcommand)]
    Worker(commands::worker::WorkerCommands),

    /// Create, inspect and control stage runs
    #[command(subcommand)]
    Run(commands::run::RunCommands),

    /// Health, rescue and cleanup
    #[command(subcommand)]
    Ops(commands::ops::OpsCommands),

    /// Import and inspect stage recipes
    #[command(subcommand)]
    Recipe(commands::recipe::RecipeCommands),
}

/// Print a command error and exit non-zero.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": chain.into_iter().skip(1).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1)
}
