//! ClinicSync CLI
//!
//! Command-line tools for ClinicSync queue files.
//!
//! # Commands
//!
//! - `inspect` - Display queue statistics and entries
//! - `verify` - Verify image integrity and queue invariants
//! - `discard` - Remove a permanently failed operation
//! - `requeue` - Move a failed operation back to the replay set
//! - `export` - Dump the queue as JSON
//!
//! Mutating commands take the queue file lock, so they refuse to run while
//! an application holds the same file open.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ClinicSync queue file tools.
#[derive(Parser)]
#[command(name = "clinisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display queue statistics
    Inspect {
        /// List every entry
        #[arg(short, long)]
        entries: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify image integrity and queue invariants
    Verify,

    /// Remove a permanently failed operation
    Discard {
        /// Operation id
        id: String,
    },

    /// Move a failed operation, and the operations held on it, back to the
    /// replay set
    Requeue {
        /// Operation id
        id: String,
    },

    /// Dump every queued operation as JSON
    Export {
        /// Write to this file instead of stdout
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
        Commands::Inspect { entries, format } => {
            let path = cli.path.ok_or("Queue file path required for inspect")?;
            commands::inspect::run(&path, entries, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Queue file path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Discard { id } => {
            let path = cli.path.ok_or("Queue file path required for discard")?;
            commands::discard::run(&path, &id)?;
        }
        Commands::Requeue { id } => {
            let path = cli.path.ok_or("Queue file path required for requeue")?;
            commands::requeue::run(&path, &id)?;
        }
        Commands::Export { output } => {
            let path = cli.path.ok_or("Queue file path required for export")?;
            commands::export::run(&path, output.as_deref())?;
        }
        Commands::Version => {
            println!("ClinicSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Queue image format v{}", clinisync_protocol::FORMAT_VERSION);
        }
    }

    Ok(())
}
