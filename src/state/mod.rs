//! Shared, lockable task store.
//!
//! Every read or write of task data goes through a [`StateGuard`] obtained
//! from [`State::lock`]. Dropping the guard releases the lock.

pub mod runner;
pub mod task;

pub use runner::{handler, CancelToken, Handler, Runner, TaskRunner};
pub use task::{Status, Task};

use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use task::TaskData;

/// Errors raised while reading task data out of the store
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("no state entry for key {key:?} in task {task}")]
    NoState { task: u64, key: String },

    #[error("cannot decode key {key:?} of task {task}: {source}")]
    Decode {
        task: u64,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode key {key:?} of task {task}: {source}")]
    Encode {
        task: u64,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StateData {
    #[serde(default)]
    last_task_id: u64,

    #[serde(default)]
    tasks: BTreeMap<u64, TaskData>,
}

/// Process-wide handle to the task store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct State {
    inner: Arc<Mutex<StateData>>,
}

/// Proof that the store lock is held
pub struct StateGuard<'a> {
    data: MutexGuard<'a, StateData>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the global store lock
    pub fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            data: self.inner.lock(),
        }
    }

    /// Acquire the lock only if nobody else holds it
    pub fn try_lock(&self) -> Option<StateGuard<'_>> {
        self.inner.try_lock().map(|data| StateGuard { data })
    }

    /// Load a state previously written by [`State::write_to`].
    /// A missing file yields an empty state.
    pub fn read_from(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("No state at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read state: {}", path.display()));
            }
        };

        let mut data: StateData = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse state: {}", path.display()))?;

        // A task still Doing was interrupted mid-run
        for task in data.tasks.values_mut() {
            if task.reset_interrupted() {
                log::warn!("Task {} was interrupted, scheduling it again", task.id());
            }
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(data)),
        })
    }

    /// Persist the whole store as JSON, replacing `path` atomically
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let encoded = {
            let st = self.lock();
            serde_json::to_vec_pretty(&*st.data).context("Failed to encode state")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, encoded)
            .with_context(|| format!("Failed to write state: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace state: {}", path.display()))?;

        Ok(())
    }
}

impl StateGuard<'_> {
    /// Create a task in `Do` status and return its handle
    pub fn new_task(&mut self, state: &State, kind: &str, summary: &str) -> Task {
        self.data.last_task_id += 1;
        let id = self.data.last_task_id;
        self.data.tasks.insert(id, TaskData::new(id, kind, summary));
        Task::new(id, state.clone())
    }

    /// Look up a task by id
    pub fn task(&self, state: &State, id: u64) -> Option<Task> {
        self.data
            .tasks
            .contains_key(&id)
            .then(|| Task::new(id, state.clone()))
    }

    /// All tasks, ordered by id
    pub fn tasks(&self, state: &State) -> Vec<Task> {
        self.data
            .tasks
            .keys()
            .map(|&id| Task::new(id, state.clone()))
            .collect()
    }

    pub(crate) fn record(&self, id: u64) -> &TaskData {
        match self.data.tasks.get(&id) {
            Some(data) => data,
            None => panic!("task {id} is not part of this state"),
        }
    }

    pub(crate) fn record_mut(&mut self, id: u64) -> &mut TaskData {
        match self.data.tasks.get_mut(&id) {
            Some(data) => data,
            None => panic!("task {id} is not part of this state"),
        }
    }
}
