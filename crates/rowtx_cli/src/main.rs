//! rowtx CLI
//!
//! Command-line demonstrations of the rowtx transaction engine.
//!
//! # Commands
//!
//! - `demo` - Run a scenario (atomicity, rollback, locking, deadlock, mvcc)
//! - `stress` - Run concurrent transfers and check the balance total

mod commands;

use clap::{Parser, Subcommand};
use commands::demo::Scenario;
use commands::stress::ModeArg;
use tracing_subscriber::EnvFilter;

/// rowtx transaction engine demos.
#[derive(Parser)]
#[command(name = "rowtx")]
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
    /// Run a demonstration scenario against a fresh database
    Demo {
        /// Scenario to run
        #[arg(value_enum, default_value = "all")]
        scenario: Scenario,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run concurrent transfers and verify the balance total
    Stress {
        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Transfers per thread
        #[arg(long, default_value = "1000")]
        transfers: usize,

        /// Number of accounts
        #[arg(short, long, default_value = "16")]
        accounts: usize,

        /// Isolation mode of the transfers
        #[arg(short, long, value_enum, default_value = "locking")]
        mode: ModeArg,

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
        Commands::Demo { scenario, format } => {
            commands::demo::run(scenario, &format)?;
        }
        Commands::Stress {
            threads,
            transfers,
            accounts,
            mode,
            format,
        } => {
            commands::stress::run(threads, transfers, accounts, mode, &format)?;
        }
        Commands::Version => {
            println!("rowtx CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("rowtx Core v{}", rowtx_core::VERSION);
        }
    }

    Ok(())
}
