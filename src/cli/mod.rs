pub mod extract;
pub mod init;
pub mod ledger;
pub mod ping;
pub mod run;
pub mod send;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "payrelay",
    version,
    about = "Pull payment statements out of email downloads and forward them to a webhook."
)]
pub struct Cli {
    /// Settings file (default: ~/.config/payrelay/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a settings file with default values.
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the payment candidates found in one statement file.
    Extract {
        /// Path to a CSV statement
        file: PathBuf,
    },
    /// Extract, validate and deliver payments from local files or directories.
    Send {
        /// CSV files or directories of CSV files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Process pending messages from the local inbox end to end.
    Run,
    /// Inspect or edit the processed-email ledger.
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
    /// Check that the webhook endpoint answers.
    Ping,
}

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Show ledger location and size.
    Status,
    /// Record an email id as processed.
    Mark { id: u64 },
    /// Tell whether an email id was already processed.
    Check { id: u64 },
    /// Drop all but the most recent ids.
    Cleanup {
        /// Ids to keep (default: ledger.keep_last_n)
        #[arg(long)]
        keep: Option<usize>,
    },
}
