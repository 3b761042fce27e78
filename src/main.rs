mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging, verbose raises the level to debug
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match cli.command {
        Command::Run => {
            commands::run::run(cli.config.as_deref())?;
        }
        Command::Status => {
            commands::status::run(cli.config.as_deref())?;
        }
        Command::Log { id } => {
            commands::task_log::run(cli.config.as_deref(), id)?;
        }
    }

    Ok(())
}
