//! txlog CLI
//!
//! Read-only tools for looking at a transaction log on disk. None of the
//! commands take the log's lock or modify any file, so they are safe to run
//! next to a live process.
//!
//! # Commands
//!
//! - `inspect` - Show the marker, current segment, archives and caches
//! - `dump` - Print decoded entries of a segment, archive or cache file
//! - `verify` - Scan segments and archives for format errors

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Transaction log inspection tools.
#[derive(Parser)]
#[command(name = "txlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base path of the log (segments are `<path>.1` and `<path>.2`)
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
    /// Show marker state, current segment header and archived versions
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print decoded entries with their offsets
    Dump {
        /// Rotating segment to dump (1 or 2); defaults to the active one
        #[arg(short, long, conflicts_with_all = ["version", "file"])]
        segment: Option<u8>,

        /// Archived version to dump
        #[arg(long, conflicts_with = "file")]
        version: Option<i64>,

        /// Headerless entry stream to dump, such as an extraction cache
        #[arg(long)]
        file: Option<PathBuf>,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check segments and archives for format errors
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Log path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Dump {
            segment,
            version,
            file,
            limit,
            format,
        } => {
            let source = match (file, version) {
                (Some(file), _) => commands::dump::Source::File(file),
                (None, Some(version)) => commands::dump::Source::Archive(version),
                (None, None) => commands::dump::Source::Segment(segment),
            };
            commands::dump::run(cli.path.as_deref(), source, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("txlog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("txlog core v{}", txlog_core::VERSION);
        }
    }

    Ok(())
}
