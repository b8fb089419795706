// ABOUTME: Entry point for the kuapo CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use kuapo::config;
use kuapo::error::Result;
use kuapo::output::{Output, OutputMode};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };

    if let Err(e) = run(cli, Output::new(mode)).await {
        Output::new(mode).error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: Output) -> Result<()> {
    let cwd = env::current_dir()?;

    match cli.command {
        Commands::Init { target, force } => {
            config::init_config(&cwd, target.as_deref(), force)?;
            output.success(&format!("Created {}", config::CONFIG_FILENAME));
            Ok(())
        }
        Commands::Deploy {
            color,
            target,
            force,
        } => {
            let config = commands::load_config(&cwd, target.as_deref())?;
            commands::deploy(config, color, force, &cwd, output).await
        }
        Commands::Status { target, attempt } => {
            let config = commands::load_config(&cwd, target.as_deref())?;
            commands::status(config, attempt, output).await
        }
        Commands::Reconcile { target } => {
            let config = commands::load_config(&cwd, target.as_deref())?;
            commands::reconcile(config, output).await
        }
    }
}
