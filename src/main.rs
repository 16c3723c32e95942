//! Pipewright CLI entry point.

use anyhow::Result;
use clap::Parser;

use pipewright::cli::{commands, handle_error, Cli, Commands, Engine};
use pipewright::infrastructure::config::ConfigLoader;
use pipewright::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;
    if let Err(err) = run(cli).await {
        handle_error(&err, json_mode);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    match cli.command {
        Commands::Init(args) => commands::init::execute(args, &config, cli.json).await,
        Commands::Worker(cmd) => commands::worker::execute(cmd, config, cli.json).await,
        Commands::Run(cmd) => {
            let engine = Engine::open(config).await?;
            commands::run::execute(cmd, &engine, cli.json).await
        }
        Commands::Ops(cmd) => {
            let engine = Engine::open(config).await?;
            commands::ops::execute(cmd, &engine, cli.json).await
        }
        Commands::Recipe(cmd) => {
            let engine = Engine::open(config).await?;
            commands::recipe::execute(cmd, &engine, cli.json).await
        }
    }
}
