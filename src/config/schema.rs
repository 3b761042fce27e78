use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub paths: Paths,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Worker threads the task runner may use at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Upper bound on ensure/wait passes per run
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
}

fn default_max_parallel() -> usize {
    4
}

fn default_max_passes() -> usize {
    8
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            max_passes: default_max_passes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Paths {
    /// Persisted task state
    #[serde(default = "default_state_path")]
    pub state: PathBuf,

    /// Root of the local snap backend
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("state.json")
}

fn default_root() -> PathBuf {
    PathBuf::from("snaps")
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            state: default_state_path(),
            root: default_root(),
        }
    }
}
