use anyhow::Result;
use colored::Colorize;
use snapstate::config::{load_config_auto, validate_config};
use snapstate::overlord::SettleReport;
use snapstate::{Overlord, SnapManager, State, Status};
use std::path::Path;

/// Task counts after a run
#[derive(Debug, Default, PartialEq, Eq)]
struct RunSummary {
    done: usize,
    failed: Vec<FailedTask>,
    pending: usize,
}

#[derive(Debug, PartialEq, Eq)]
struct FailedTask {
    id: u64,
    kind: String,
    reason: String,
}

pub fn run(config_path: Option<&Path>) -> Result<()> {
    // Load config
    let (path, config) = load_config_auto(config_path)?;
    match &path {
        Some(path) => log::info!("Loaded config from: {}", path.display()),
        None => log::info!("No config file found, using defaults"),
    }

    // Validate config
    validate_config(&config)?;

    let state = State::read_from(&config.paths.state)?;
    let manager = SnapManager::new(state.clone(), &config)?;

    let mut overlord = Overlord::new(state.clone());
    overlord.add_manager(Box::new(manager));

    let report = settle_and_persist(
        &overlord,
        &state,
        &config.paths.state,
        config.settings.max_passes,
    )?;

    if !report.settled {
        log::warn!(
            "Tasks were still changing after {} passes",
            report.passes
        );
    }

    let summary = summarize(&state);
    print_summary(&summary);

    if !summary.failed.is_empty() {
        anyhow::bail!("{} task(s) failed", summary.failed.len());
    }

    Ok(())
}

/// Settle, then stop the managers and write the state even when settling failed
fn settle_and_persist(
    overlord: &Overlord,
    state: &State,
    state_path: &Path,
    max_passes: usize,
) -> Result<SettleReport> {
    let settled = overlord.settle(max_passes);
    overlord.stop();
    let persisted = state.write_to(state_path);

    let report = settled?;
    persisted?;
    Ok(report)
}

fn summarize(state: &State) -> RunSummary {
    let st = state.lock();
    let mut summary = RunSummary::default();

    for task in st.tasks(state) {
        match task.status(&st) {
            Status::Done => summary.done += 1,
            Status::Error => summary.failed.push(FailedTask {
                id: task.id(),
                kind: task.kind(&st),
                reason: task.log(&st).pop().unwrap_or_default(),
            }),
            Status::Do | Status::Doing => summary.pending += 1,
            Status::Hold => {}
        }
    }

    summary
}

fn print_summary(summary: &RunSummary) {
    println!();
    if summary.failed.is_empty() {
        println!(
            "{}",
            format!("✓ {} task(s) done", summary.done).green().bold()
        );
    } else {
        println!("{}", "=".repeat(50).yellow());
        println!("{}", "⚠️  snapstate completed with issues".yellow().bold());
        println!("{}", "=".repeat(50).yellow());
        println!();
        println!("{}", "Failed tasks:".red().bold());
        for failure in &summary.failed {
            println!("  ❌ {} ({})", failure.id.to_string().red(), failure.kind);
            println!("     Reason: {}", failure.reason);
        }
        println!();
        println!("  {} task(s) done", summary.done);
    }

    if summary.pending > 0 {
        println!(
            "  {} task(s) still pending (no handler or not settled)",
            summary.pending.to_string().yellow()
        );
    }
}
