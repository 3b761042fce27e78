pub mod registry;
pub mod snap;

pub use registry::{KindMetadata, TaskKind, TASK_KINDS};
pub use snap::SnapManager;

use anyhow::Result;

/// Lifecycle every manager exposes to the overlord
pub trait StateManager {
    /// Run one scheduling pass
    fn ensure(&self) -> Result<()>;

    /// Block until every task started so far has finished
    fn wait(&self);

    /// Cancel and shut down
    fn stop(&self);
}
