// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use kuapo::types::Color;

#[derive(Parser)]
#[command(name = "kuapo")]
#[command(about = "Zero-downtime blue/green releases with automatic rollback")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result (for CI)
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Emit JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new kuapo.yml configuration file
    Init {
        /// Target name (default: web-prod)
        #[arg(short, long)]
        target: Option<String>,

        /// Overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Release a color and switch live traffic to it
    Deploy {
        /// Color to release (blue or green)
        color: Color,

        /// Target (defined in config)
        #[arg(short, long)]
        target: Option<String>,

        /// Break a deploy lock held by another process
        #[arg(long)]
        force: bool,
    },

    /// Show the latest or a specific deployment attempt
    Status {
        /// Target (defined in config)
        #[arg(short, long)]
        target: Option<String>,

        /// Attempt ID to show instead of the latest
        #[arg(long)]
        attempt: Option<String>,
    },

    /// Adopt the load balancer's live color and unblock the target
    Reconcile {
        /// Target (defined in config)
        #[arg(short, long)]
        target: Option<String>,
    },
}
