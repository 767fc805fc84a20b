//! BizSync CLI
//!
//! Command-line tools for BizSync payloads and the sync engine.
//!
//! # Commands
//!
//! - `validate` - Check a payload file against a resource schema
//! - `repair` - Print the repaired form of a payload file
//! - `simulate` - Run the engine against in-memory backends

mod commands;

use bizsync_core::Resource;
use clap::{Parser, Subcommand};
use commands::simulate::SimulateOptions;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// BizSync command-line tools.
#[derive(Parser)]
#[command(name = "bizsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a payload file against a resource schema
    Validate {
        /// JSON payload file
        file: PathBuf,

        /// Resource (business_plan, section, user_profile)
        #[arg(short, long)]
        resource: Resource,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the repaired form of a payload file
    Repair {
        /// JSON payload file
        file: PathBuf,

        /// Resource (business_plan, section, user_profile)
        #[arg(short, long)]
        resource: Resource,
    },

    /// Run the sync engine against in-memory backends
    Simulate {
        /// Number of operations to enqueue
        #[arg(short, long, default_value = "30")]
        operations: usize,

        /// Fraction of record store calls that fail (0.0 - 1.0)
        #[arg(long, default_value = "0.0")]
        failure_rate: f64,

        /// Keep the network offline for this long at the start
        #[arg(long, default_value = "0")]
        offline_for_ms: u64,

        /// Engine configuration file (JSON, durations in milliseconds)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up waiting for the queue after this long
        #[arg(long, default_value = "120000")]
        timeout_ms: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
        Commands::Validate {
            file,
            resource,
            format,
        } => {
            commands::validate::run(&file, resource, &format)?;
        }
        Commands::Repair { file, resource } => {
            commands::repair::run(&file, resource)?;
        }
        Commands::Simulate {
            operations,
            failure_rate,
            offline_for_ms,
            config,
            timeout_ms,
            format,
        } => {
            if !(0.0..=1.0).contains(&failure_rate) {
                return Err("failure rate must be between 0.0 and 1.0".into());
            }
            commands::simulate::run(SimulateOptions {
                operations,
                failure_rate,
                offline_for: Duration::from_millis(offline_for_ms),
                config: config.as_deref(),
                timeout: Duration::from_millis(timeout_ms),
                format: &format,
            })?;
        }
        Commands::Version => {
            println!("BizSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("BizSync Core v{}", bizsync_core::VERSION);
        }
    }

    Ok(())
}
