/// Every task kind the snap manager registers a handler for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    InstallSnap,
    UpdateSnap,
    RemoveSnap,
    PurgeSnap,
    RollbackSnap,
    SetActiveSnap,
    FakeInstallSnap,
    FakeInstallSnapError,
}

/// Metadata for a task kind
#[derive(Debug, Clone)]
pub struct KindMetadata {
    /// Stable name persisted tasks are routed by. Never rename.
    pub name: &'static str,

    pub kind: TaskKind,

    /// Human-readable description for status output
    pub description: &'static str,

    /// Whether the backend is called with the bare name instead of `name.developer`
    pub strips_developer: bool,

    /// Diagnostic kinds carry no payload and never touch the backend
    pub diagnostic: bool,
}

/// Registry of all task kinds, in registration order
pub static TASK_KINDS: &[KindMetadata] = &[
    KindMetadata {
        name: "install-snap",
        kind: TaskKind::InstallSnap,
        description: "Install a snap",
        strips_developer: false,
        diagnostic: false,
    },
    KindMetadata {
        name: "update-snap",
        kind: TaskKind::UpdateSnap,
        description: "Update a snap",
        strips_developer: false,
        diagnostic: false,
    },
    KindMetadata {
        name: "remove-snap",
        kind: TaskKind::RemoveSnap,
        description: "Remove a snap",
        strips_developer: true,
        diagnostic: false,
    },
    KindMetadata {
        name: "purge-snap",
        kind: TaskKind::PurgeSnap,
        description: "Purge snap data",
        strips_developer: true,
        diagnostic: false,
    },
    KindMetadata {
        name: "rollback-snap",
        kind: TaskKind::RollbackSnap,
        description: "Roll back a snap",
        strips_developer: true,
        diagnostic: false,
    },
    KindMetadata {
        name: "set-active-snap",
        kind: TaskKind::SetActiveSnap,
        description: "Activate or deactivate a snap",
        strips_developer: true,
        diagnostic: false,
    },
    KindMetadata {
        name: "fake-install-snap",
        kind: TaskKind::FakeInstallSnap,
        description: "Diagnostic: always succeeds",
        strips_developer: false,
        diagnostic: true,
    },
    KindMetadata {
        name: "fake-install-snap-error",
        kind: TaskKind::FakeInstallSnapError,
        description: "Diagnostic: always fails",
        strips_developer: false,
        diagnostic: true,
    },
];

impl KindMetadata {
    /// Get kind metadata by persisted name
    pub fn get_by_name(name: &str) -> Option<&'static KindMetadata> {
        TASK_KINDS.iter().find(|m| m.name == name)
    }

    /// Kinds that make up the production operation set
    pub fn production() -> impl Iterator<Item = &'static KindMetadata> {
        TASK_KINDS.iter().filter(|m| !m.diagnostic)
    }
}

impl TaskKind {
    pub fn metadata(self) -> &'static KindMetadata {
        match TASK_KINDS.iter().find(|m| m.kind == self) {
            Some(meta) => meta,
            None => unreachable!("every task kind has a registry entry"),
        }
    }

    pub fn name(self) -> &'static str {
        self.metadata().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        KindMetadata::get_by_name(name).map(|m| m.kind)
    }
}
