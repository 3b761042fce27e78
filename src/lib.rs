//! Task-dispatching manager for the snap lifecycle.
//!
//! Tasks are created elsewhere and persisted in a [`state::State`]. A
//! [`managers::SnapManager`] registers one handler per task kind on its
//! runner; each handler decodes the task payload under the store lock and
//! then calls the [`backend::Backend`] without holding it.

pub mod backend;
pub mod config;
pub mod managers;
pub mod overlord;
pub mod state;

pub use managers::{SnapManager, StateManager};
pub use overlord::Overlord;
pub use state::{State, Status, Task};
