//! `snapstate.toml`: discovery, parsing and validation.

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::*;
pub use schema::*;
pub use validator::*;
