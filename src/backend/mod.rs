pub mod flags;
pub mod local;
pub mod progress;

pub use flags::{InstallFlags, PurgeFlags, RemoveFlags};
pub use local::LocalBackend;
pub use progress::{Meter, NullProgress};

use anyhow::Result;

/// A snap revision left installed by an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledSnap {
    pub name: String,
    pub version: String,
    pub channel: String,
}

/// Performs the actual snap lifecycle operations.
///
/// `install` and `update` take the developer-qualified name; every other
/// operation is keyed on the bare snap name.
pub trait Backend: Send + Sync {
    fn install(
        &self,
        name: &str,
        channel: &str,
        flags: InstallFlags,
        meter: &mut dyn Meter,
    ) -> Result<InstalledSnap>;

    fn update(
        &self,
        name: &str,
        channel: &str,
        flags: InstallFlags,
        meter: &mut dyn Meter,
    ) -> Result<()>;

    fn remove(&self, name: &str, flags: RemoveFlags, meter: &mut dyn Meter) -> Result<()>;

    fn purge(&self, name: &str, flags: PurgeFlags, meter: &mut dyn Meter) -> Result<()>;

    /// Roll back to `version`, or to the previous revision when `version` is empty
    fn rollback(&self, name: &str, version: &str, meter: &mut dyn Meter) -> Result<InstalledSnap>;

    fn set_active(&self, name: &str, active: bool, meter: &mut dyn Meter) -> Result<()>;
}

/// Split a qualified `name.developer` into its parts. A bare name yields an
/// empty developer.
pub fn split_developer(name: &str) -> (&str, &str) {
    match name.rsplit_once('.') {
        Some((base, developer)) => (base, developer),
        None => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_qualified_name() {
        assert_eq!(split_developer("foo.bar"), ("foo", "bar"));
    }

    #[test]
    fn split_bare_name_is_unchanged() {
        assert_eq!(split_developer("foo"), ("foo", ""));
        assert_eq!(split_developer(""), ("", ""));
    }

    #[test]
    fn split_uses_last_dot() {
        assert_eq!(split_developer("foo.bar.baz"), ("foo.bar", "baz"));
    }
}
