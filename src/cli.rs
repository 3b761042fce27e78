use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "snapstate")]
#[command(author, version, long_about = None)]
#[command(about = "Runs persisted snap lifecycle tasks")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run every pending task until the state settles
    Run,

    /// List tasks and their status
    Status,

    /// Show the log of a task
    Log {
        /// Task id
        id: u64,
    },
}
