//! Dominus CLI
//!
//! Command-line tools for Dominus node stores.
//!
//! # Commands
//!
//! - `inspect` - Display the store header, sizes and counters
//! - `verify` - Check every tree invariant of the store
//! - `compact` - Rewrite the text pool without free chunks
//! - `dump` - Print raw node records for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Dominus command-line store tools.
#[derive(Parser)]
#[command(name = "dominus")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display store header, sizes and counters
    Inspect {
        /// List interned names
        #[arg(short, long)]
        names: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify store integrity
    Verify {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Compact the text pool to reclaim freed payload space
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump node records for debugging
    Dump {
        /// First handle to dump
        #[arg(short, long, default_value = "1")]
        start: u64,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { names, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, names, &format)?;
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, &format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Dump {
            start,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, start, limit, &format)?;
        }
        Commands::Version => {
            println!("Dominus CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Dominus Core v{}", dominus_core::VERSION);
        }
    }

    Ok(())
}
