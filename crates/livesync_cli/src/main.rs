//! LiveSync CLI
//!
//! Command-line tools for working with sync configurations offline.
//!
//! Every command reads a workspace file: a JSON document holding
//! collection schemas, records and sync configurations, loaded into an
//! in-memory store.
//!
//! # Commands
//!
//! - `validate` - Check configurations against the schemas
//! - `preview` - Show what syncing a record would do
//! - `sync` - Run a bulk sync, or sync one record
//! - `replay` - Load the records through the live sync path

mod commands;
mod workspace;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LiveSync command-line tools.
#[derive(Parser)]
#[command(name = "livesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the workspace file
    #[arg(global = true, short, long)]
    workspace: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check configurations against the schemas
    Validate {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show what syncing a record would do, without writing
    Preview {
        /// Configuration name
        #[arg(short, long)]
        config: String,

        /// Collection to read from (defaults to the configuration's source)
        #[arg(long)]
        collection: Option<String>,

        /// Record to preview (defaults to the most recently modified)
        #[arg(short, long)]
        record: Option<String>,
    },

    /// Run a bulk sync, or sync one record
    Sync {
        /// Configuration name
        #[arg(short, long)]
        config: String,

        /// Collection to sync from (defaults to the configuration's source)
        #[arg(long)]
        collection: Option<String>,

        /// Sync only this record
        #[arg(short, long)]
        record: Option<String>,

        /// Maximum number of records for a bulk run
        #[arg(short, long)]
        limit: Option<usize>,

        /// Write directly, skipping validation
        #[arg(long)]
        fast: bool,

        /// Write the resulting workspace to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load the records through the live sync path
    Replay {
        /// Write the resulting workspace to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { format } => {
            let path = cli.workspace.ok_or("Workspace file required for validate")?;
            commands::validate::run(&path, &format)?;
        }
        Commands::Preview {
            config,
            collection,
            record,
        } => {
            let path = cli.workspace.ok_or("Workspace file required for preview")?;
            commands::preview::run(&path, &config, collection.as_deref(), record.as_deref())?;
        }
        Commands::Sync {
            config,
            collection,
            record,
            limit,
            fast,
            output,
        } => {
            let path = cli.workspace.ok_or("Workspace file required for sync")?;
            let args = commands::sync::SyncArgs {
                configuration: config,
                collection,
                record,
                limit,
                fast,
                output,
            };
            commands::sync::run(&path, &args)?;
        }
        Commands::Replay { output } => {
            let path = cli.workspace.ok_or("Workspace file required for replay")?;
            commands::replay::run(&path, output.as_deref())?;
        }
        Commands::Version => {
            println!("LiveSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
