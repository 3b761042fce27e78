use crate::managers::StateManager;
use crate::state::{State, Status};
use anyhow::Result;

/// Outcome of [`Overlord::settle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleReport {
    pub passes: usize,

    /// False when the pass limit was hit while tasks were still changing
    pub settled: bool,
}

/// Drives a set of managers over one shared state
pub struct Overlord {
    state: State,
    managers: Vec<Box<dyn StateManager>>,
}

impl Overlord {
    pub fn new(state: State) -> Self {
        Self {
            state,
            managers: Vec::new(),
        }
    }

    pub fn add_manager(&mut self, manager: Box<dyn StateManager>) {
        self.managers.push(manager);
    }

    /// Ensure and wait on every manager until a full pass changes no task
    /// status, or `max_passes` passes have run.
    pub fn settle(&self, max_passes: usize) -> Result<SettleReport> {
        let mut before = self.snapshot();

        for pass in 1..=max_passes {
            log::debug!("Settle pass {}", pass);
            for manager in &self.managers {
                manager.ensure()?;
            }
            for manager in &self.managers {
                manager.wait();
            }

            let after = self.snapshot();
            if after == before {
                return Ok(SettleReport {
                    passes: pass,
                    settled: true,
                });
            }
            before = after;
        }

        Ok(SettleReport {
            passes: max_passes,
            settled: false,
        })
    }

    pub fn stop(&self) {
        for manager in &self.managers {
            manager.stop();
        }
    }

    fn snapshot(&self) -> Vec<(u64, Status)> {
        let st = self.state.lock();
        st.tasks(&self.state)
            .iter()
            .map(|t| (t.id(), t.status(&st)))
            .collect()
    }
}
