use anyhow::Result;
use colored::Colorize;
use snapstate::config::load_config_auto;
use snapstate::managers::KindMetadata;
use snapstate::{State, Status};
use std::path::Path;

pub fn run(config_path: Option<&Path>) -> Result<()> {
    let (_config_path, config) = load_config_auto(config_path)?;
    let state = State::read_from(&config.paths.state)?;

    let st = state.lock();
    let tasks = st.tasks(&state);
    if tasks.is_empty() {
        println!("No tasks in {}", config.paths.state.display());
        return Ok(());
    }

    println!(
        "{}",
        format!("{:>4}  {:<6}  {:<24}  {}", "ID", "Status", "Kind", "Summary").bold()
    );
    for task in tasks {
        let kind = task.kind(&st);
        let summary = match (task.summary(&st), KindMetadata::get_by_name(&kind)) {
            (summary, _) if !summary.is_empty() => summary,
            (_, Some(meta)) => meta.description.to_string(),
            (_, None) => "(unknown kind)".dimmed().to_string(),
        };

        let status = task.status(&st);
        let label = format!("{:<6}", status.to_string());
        let label = match status {
            Status::Done => label.green(),
            Status::Error => label.red(),
            Status::Doing => label.yellow(),
            Status::Hold => label.dimmed(),
            Status::Do => label.normal(),
        };

        println!("{:>4}  {}  {:<24}  {}", task.id(), label, kind, summary);
    }

    Ok(())
}
