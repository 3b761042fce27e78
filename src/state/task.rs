use super::{State, StateError, StateGuard};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Do,
    Doing,
    Done,
    Error,
    Hold,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Do => "Do",
            Status::Doing => "Doing",
            Status::Done => "Done",
            Status::Error => "Error",
            Status::Hold => "Hold",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TaskData {
    id: u64,
    kind: String,

    #[serde(default)]
    summary: String,

    #[serde(default)]
    status: Status,

    #[serde(default)]
    data: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    log: Vec<String>,
}

impl TaskData {
    pub(crate) fn new(id: u64, kind: &str, summary: &str) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            summary: summary.to_string(),
            status: Status::Do,
            data: BTreeMap::new(),
            log: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Move a task left `Doing` back to `Do`
    pub(crate) fn reset_interrupted(&mut self) -> bool {
        if self.status == Status::Doing {
            self.status = Status::Do;
            return true;
        }
        false
    }
}

/// Handle to a task record. All accessors require the store lock.
#[derive(Debug, Clone)]
pub struct Task {
    id: u64,
    state: State,
}

impl Task {
    pub(crate) fn new(id: u64, state: State) -> Self {
        Self { id, state }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The store this task lives in
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn kind(&self, st: &StateGuard<'_>) -> String {
        st.record(self.id).kind.clone()
    }

    pub fn summary(&self, st: &StateGuard<'_>) -> String {
        st.record(self.id).summary.clone()
    }

    pub fn status(&self, st: &StateGuard<'_>) -> Status {
        st.record(self.id).status
    }

    pub fn set_status(&self, st: &mut StateGuard<'_>, status: Status) {
        st.record_mut(self.id).status = status;
    }

    /// Decode the value stored under `key`
    pub fn get<T: DeserializeOwned>(&self, st: &StateGuard<'_>, key: &str) -> Result<T, StateError> {
        let raw = st
            .record(self.id)
            .data
            .get(key)
            .ok_or_else(|| StateError::NoState {
                task: self.id,
                key: key.to_string(),
            })?;

        T::deserialize(raw).map_err(|source| StateError::Decode {
            task: self.id,
            key: key.to_string(),
            source,
        })
    }

    /// Encode `value` under `key`, replacing any previous value
    pub fn set<T: Serialize + ?Sized>(
        &self,
        st: &mut StateGuard<'_>,
        key: &str,
        value: &T,
    ) -> Result<(), StateError> {
        let encoded = serde_json::to_value(value).map_err(|source| StateError::Encode {
            task: self.id,
            key: key.to_string(),
            source,
        })?;
        st.record_mut(self.id).data.insert(key.to_string(), encoded);
        Ok(())
    }

    /// Append a timestamped error line to the task log
    pub fn errorf(&self, st: &mut StateGuard<'_>, line: impl fmt::Display) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        st.record_mut(self.id).log.push(format!("{secs} ERROR {line}"));
    }

    pub fn log(&self, st: &StateGuard<'_>) -> Vec<String> {
        st.record(self.id).log.clone()
    }
}
