use anyhow::Result;
use snapstate::config::load_config_auto;
use snapstate::State;
use std::path::Path;

pub fn run(config_path: Option<&Path>, id: u64) -> Result<()> {
    let (_config_path, config) = load_config_auto(config_path)?;
    let state = State::read_from(&config.paths.state)?;

    let st = state.lock();
    let Some(task) = st.task(&state, id) else {
        anyhow::bail!("No task with id {}", id);
    };

    let lines = task.log(&st);
    if lines.is_empty() {
        println!("Task {} ({}) has no log entries", id, task.kind(&st));
    }
    for line in lines {
        println!("{}", line);
    }

    Ok(())
}
