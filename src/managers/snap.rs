//! Snap manager: routes snap lifecycle tasks to the backend.
//!
//! Every handler reads the task payload under the store lock, releases the
//! lock, and then makes exactly one backend call. Handlers accept the
//! runner's [`CancelToken`] but do not poll it, so a backend call that has
//! started always runs to completion.

use super::registry::{TaskKind, TASK_KINDS};
use super::StateManager;
use crate::backend::{
    split_developer, Backend, InstallFlags, LocalBackend, NullProgress, PurgeFlags, RemoveFlags,
};
use crate::config::Config;
use crate::state::{handler, CancelToken, Handler, Runner, State, StateError, Task, TaskRunner};
use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Key the payload of every snap task is stored under
pub const STATE_KEY: &str = "state";

/// Error returned by the `fake-install-snap-error` diagnostic kind
pub const FAKE_INSTALL_ERROR: &str = "fake-install-snap-error errored";

/// Payload of `install-snap` and `update-snap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallState {
    pub name: String,

    #[serde(default)]
    pub channel: String,

    #[serde(default, skip_serializing_if = "InstallFlags::is_empty")]
    pub flags: InstallFlags,
}

/// Payload of `remove-snap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveState {
    pub name: String,

    #[serde(default, skip_serializing_if = "RemoveFlags::is_empty")]
    pub flags: RemoveFlags,
}

/// Payload of `purge-snap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeState {
    pub name: String,

    #[serde(default, skip_serializing_if = "PurgeFlags::is_empty")]
    pub flags: PurgeFlags,
}

/// Payload of `rollback-snap`. An empty version means the previous revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackState {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Payload of `set-active-snap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetActiveState {
    pub name: String,

    #[serde(default)]
    pub active: bool,
}

/// Responsible for the installation and removal of snaps
pub struct SnapManager<R: Runner = TaskRunner> {
    state: State,
    runner: R,
}

impl SnapManager<TaskRunner> {
    /// Manager over a [`LocalBackend`] rooted at the configured snaps directory
    pub fn new(state: State, config: &Config) -> Result<Self> {
        let backend = Arc::new(LocalBackend::new(&config.paths.root));
        Self::with_backend(state, backend, config.settings.max_parallel)
    }

    pub fn with_backend(
        state: State,
        backend: Arc<dyn Backend>,
        max_parallel: usize,
    ) -> Result<Self> {
        let runner = TaskRunner::new(state.clone(), max_parallel)?;
        Ok(Self::with_runner(state, backend, runner))
    }
}

impl<R: Runner> SnapManager<R> {
    /// Register one handler per task kind on `runner`
    pub fn with_runner(state: State, backend: Arc<dyn Backend>, mut runner: R) -> Self {
        for meta in TASK_KINDS {
            runner.add_handler(meta.name, handler_for(meta.kind, &backend));
        }

        Self { state, runner }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }
}

impl<R: Runner> StateManager for SnapManager<R> {
    fn ensure(&self) -> Result<()> {
        self.runner.ensure();
        Ok(())
    }

    fn wait(&self) {
        self.runner.wait();
    }

    fn stop(&self) {
        self.runner.stop();
    }
}

fn handler_for(kind: TaskKind, backend: &Arc<dyn Backend>) -> Handler {
    let backend = Arc::clone(backend);
    match kind {
        TaskKind::InstallSnap => handler(move |t, c| do_install_snap(&*backend, t, c)),
        TaskKind::UpdateSnap => handler(move |t, c| do_update_snap(&*backend, t, c)),
        TaskKind::RemoveSnap => handler(move |t, c| do_remove_snap(&*backend, t, c)),
        TaskKind::PurgeSnap => handler(move |t, c| do_purge_snap(&*backend, t, c)),
        TaskKind::RollbackSnap => handler(move |t, c| do_rollback_snap(&*backend, t, c)),
        TaskKind::SetActiveSnap => handler(move |t, c| do_set_active_snap(&*backend, t, c)),
        TaskKind::FakeInstallSnap => handler(|_, _| Ok(())),
        TaskKind::FakeInstallSnapError => handler(|_, _| Err(anyhow!(FAKE_INSTALL_ERROR))),
    }
}

/// Decode the task payload. The store lock is held only for the decode.
fn read_payload<T: DeserializeOwned>(task: &Task) -> Result<T, StateError> {
    let st = task.state().lock();
    task.get(&st, STATE_KEY)
}

/// The name the backend expects for `kind`
fn target_name(kind: TaskKind, name: &str) -> &str {
    if kind.metadata().strips_developer {
        split_developer(name).0
    } else {
        name
    }
}

fn do_install_snap(backend: &dyn Backend, task: &Task, _cancel: &CancelToken) -> Result<()> {
    let inst: InstallState = read_payload(task)?;
    let name = target_name(TaskKind::InstallSnap, &inst.name);
    backend.install(name, &inst.channel, inst.flags, &mut NullProgress)?;
    Ok(())
}

fn do_update_snap(backend: &dyn Backend, task: &Task, _cancel: &CancelToken) -> Result<()> {
    let inst: InstallState = read_payload(task)?;
    let name = target_name(TaskKind::UpdateSnap, &inst.name);
    backend.update(name, &inst.channel, inst.flags, &mut NullProgress)
}

fn do_remove_snap(backend: &dyn Backend, task: &Task, _cancel: &CancelToken) -> Result<()> {
    let rm: RemoveState = read_payload(task)?;
    let name = target_name(TaskKind::RemoveSnap, &rm.name);
    backend.remove(name, rm.flags, &mut NullProgress)
}

fn do_purge_snap(backend: &dyn Backend, task: &Task, _cancel: &CancelToken) -> Result<()> {
    let purge: PurgeState = read_payload(task)?;
    let name = target_name(TaskKind::PurgeSnap, &purge.name);
    backend.purge(name, purge.flags, &mut NullProgress)
}

fn do_rollback_snap(backend: &dyn Backend, task: &Task, _cancel: &CancelToken) -> Result<()> {
    let rollback: RollbackState = read_payload(task)?;
    let name = target_name(TaskKind::RollbackSnap, &rollback.name);
    backend.rollback(name, &rollback.version, &mut NullProgress)?;
    Ok(())
}

fn do_set_active_snap(backend: &dyn Backend, task: &Task, _cancel: &CancelToken) -> Result<()> {
    let set_active: SetActiveState = read_payload(task)?;
    let name = target_name(TaskKind::SetActiveSnap, &set_active.name);
    backend.set_active(name, set_active.active, &mut NullProgress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InstalledSnap, Meter};
    use crate::state::Status;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Install(String, String, InstallFlags),
        Update(String, String, InstallFlags),
        Remove(String, RemoveFlags),
        Purge(String, PurgeFlags),
        Rollback(String, String),
        SetActive(String, bool),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("conflicting change in progress for {0}")]
    struct Conflict(String);

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<Call>>,
        fail: bool,
        /// When set, every call checks from another thread that the store is unlocked
        watch: Option<State>,
        lock_free: Mutex<Vec<bool>>,
    }

    impl RecordingBackend {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn watching(state: &State) -> Self {
            Self {
                watch: Some(state.clone()),
                ..Self::default()
            }
        }

        fn record(&self, call: Call) -> Result<()> {
            if let Some(state) = &self.watch {
                let free = std::thread::scope(|s| {
                    s.spawn(|| state.try_lock().is_some())
                        .join()
                        .expect("lock check thread")
                });
                self.lock_free.lock().push(free);
            }

            let name = match &call {
                Call::Install(n, ..) | Call::Update(n, ..) => n.clone(),
                Call::Remove(n, _) | Call::Purge(n, _) => n.clone(),
                Call::Rollback(n, _) | Call::SetActive(n, _) => n.clone(),
            };
            self.calls.lock().push(call);

            if self.fail {
                return Err(Conflict(name).into());
            }
            Ok(())
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl Backend for RecordingBackend {
        fn install(
            &self,
            name: &str,
            channel: &str,
            flags: InstallFlags,
            meter: &mut dyn Meter,
        ) -> Result<InstalledSnap> {
            meter.notify("installing");
            self.record(Call::Install(name.into(), channel.into(), flags))?;
            Ok(InstalledSnap {
                name: name.into(),
                version: "1.0".into(),
                channel: channel.into(),
            })
        }

        fn update(
            &self,
            name: &str,
            channel: &str,
            flags: InstallFlags,
            _meter: &mut dyn Meter,
        ) -> Result<()> {
            self.record(Call::Update(name.into(), channel.into(), flags))
        }

        fn remove(&self, name: &str, flags: RemoveFlags, _meter: &mut dyn Meter) -> Result<()> {
            self.record(Call::Remove(name.into(), flags))
        }

        fn purge(&self, name: &str, flags: PurgeFlags, _meter: &mut dyn Meter) -> Result<()> {
            self.record(Call::Purge(name.into(), flags))
        }

        fn rollback(
            &self,
            name: &str,
            version: &str,
            _meter: &mut dyn Meter,
        ) -> Result<InstalledSnap> {
            self.record(Call::Rollback(name.into(), version.into()))?;
            Ok(InstalledSnap {
                name: name.into(),
                version: version.into(),
                channel: "stable".into(),
            })
        }

        fn set_active(&self, name: &str, active: bool, _meter: &mut dyn Meter) -> Result<()> {
            self.record(Call::SetActive(name.into(), active))
        }
    }

    #[derive(Default)]
    struct StubRunner {
        handlers: HashMap<String, Handler>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl Runner for StubRunner {
        fn add_handler(&mut self, kind: &str, handler: Handler) {
            assert!(
                self.handlers.insert(kind.to_string(), handler).is_none(),
                "{kind} registered twice"
            );
        }

        fn ensure(&self) {
            self.calls.lock().push("ensure");
        }

        fn wait(&self) {
            self.calls.lock().push("wait");
        }

        fn stop(&self) {
            self.calls.lock().push("stop");
        }
    }

    fn manager_with(backend: Arc<RecordingBackend>) -> SnapManager<StubRunner> {
        SnapManager::with_runner(State::new(), backend, StubRunner::default())
    }

    /// Create a task of `kind` and invoke its registered handler directly
    fn run_kind(
        manager: &SnapManager<StubRunner>,
        kind: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let state = manager.state();
        let task = {
            let mut st = state.lock();
            let task = st.new_task(state, kind, "");
            if let Some(payload) = &payload {
                task.set(&mut st, STATE_KEY, payload).expect("must set payload");
            }
            task
        };

        let handler = manager
            .runner()
            .handlers
            .get(kind)
            .unwrap_or_else(|| panic!("no handler for {kind}"));
        handler(&task, &CancelToken::new())
    }

    #[test]
    fn every_kind_is_registered_once() {
        let manager = manager_with(Arc::new(RecordingBackend::default()));
        let mut registered: Vec<_> = manager.runner().handlers.keys().cloned().collect();
        registered.sort();

        let mut expected: Vec<_> = TASK_KINDS.iter().map(|m| m.name.to_string()).collect();
        expected.sort();
        assert_eq!(registered, expected);
    }

    #[test]
    fn install_keeps_qualified_name() {
        let backend = Arc::new(RecordingBackend::default());
        let manager = manager_with(backend.clone());

        run_kind(
            &manager,
            "install-snap",
            Some(json!({"name": "foo.bar", "channel": "stable", "flags": 0})),
        )
        .expect("must install");

        assert_eq!(
            backend.calls(),
            vec![Call::Install(
                "foo.bar".into(),
                "stable".into(),
                InstallFlags::empty()
            )]
        );
    }

    #[test]
    fn update_passes_payload_verbatim() {
        let backend = Arc::new(RecordingBackend::default());
        let manager = manager_with(backend.clone());

        run_kind(
            &manager,
            "update-snap",
            Some(json!({"name": "foo.bar", "channel": "edge", "flags": 4})),
        )
        .expect("must update");

        assert_eq!(
            backend.calls(),
            vec![Call::Update(
                "foo.bar".into(),
                "edge".into(),
                InstallFlags::DO_INSTALL_GC
            )]
        );
    }

    #[test]
    fn remove_strips_developer() {
        let backend = Arc::new(RecordingBackend::default());
        let manager = manager_with(backend.clone());

        run_kind(&manager, "remove-snap", Some(json!({"name": "foo.bar", "flags": 0})))
            .expect("must remove");

        assert_eq!(
            backend.calls(),
            vec![Call::Remove("foo".into(), RemoveFlags::empty())]
        );
    }

    #[test]
    fn bare_name_is_passed_unchanged() {
        let backend = Arc::new(RecordingBackend::default());
        let manager = manager_with(backend.clone());

        run_kind(&manager, "remove-snap", Some(json!({"name": "foo"}))).expect("must remove");

        assert_eq!(
            backend.calls(),
            vec![Call::Remove("foo".into(), RemoveFlags::empty())]
        );
    }

    #[test]
    fn purge_rollback_and_set_active_strip_developer() {
        let backend = Arc::new(RecordingBackend::default());
        let manager = manager_with(backend.clone());

        run_kind(&manager, "purge-snap", Some(json!({"name": "foo.bar", "flags": 1})))
            .expect("must purge");
        run_kind(
            &manager,
            "rollback-snap",
            Some(json!({"name": "foo.bar", "version": "1.2"})),
        )
        .expect("must roll back");
        run_kind(&manager, "rollback-snap", Some(json!({"name": "foo.bar"})))
            .expect("must roll back");
        run_kind(
            &manager,
            "set-active-snap",
            Some(json!({"name": "foo.bar", "active": true})),
        )
        .expect("must activate");

        assert_eq!(
            backend.calls(),
            vec![
                Call::Purge("foo".into(), PurgeFlags::DO_PURGE_ACTIVE),
                Call::Rollback("foo".into(), "1.2".into()),
                Call::Rollback("foo".into(), "".into()),
                Call::SetActive("foo".into(), true),
            ]
        );
    }

    #[test]
    fn remove_strips_only_last_segment() {
        let backend = Arc::new(RecordingBackend::default());
        let manager = manager_with(backend.clone());

        run_kind(&manager, "remove-snap", Some(json!({"name": "foo.bar.baz"})))
            .expect("must remove");

        assert_eq!(
            backend.calls(),
            vec![Call::Remove("foo.bar".into(), RemoveFlags::empty())]
        );
    }

    #[test]
    fn dot_only_and_empty_names_are_split_as_given() {
        let backend = Arc::new(RecordingBackend::default());
        let manager = manager_with(backend.clone());

        run_kind(&manager, "install-snap", Some(json!({"name": ".dev"}))).expect("must install");
        run_kind(&manager, "remove-snap", Some(json!({"name": ".dev"}))).expect("must remove");
        run_kind(&manager, "purge-snap", Some(json!({"name": ""}))).expect("must purge");
        run_kind(&manager, "set-active-snap", Some(json!({"name": "."}))).expect("must run");

        assert_eq!(
            backend.calls(),
            vec![
                Call::Install(".dev".into(), "".into(), InstallFlags::empty()),
                Call::Remove("".into(), RemoveFlags::empty()),
                Call::Purge("".into(), PurgeFlags::empty()),
                Call::SetActive("".into(), false),
            ]
        );
    }

    #[test]
    fn purge_of_dot_only_name_fails_against_local_backend() {
        let dir = tempfile::tempdir().expect("must create tempdir");
        std::fs::write(dir.path().join("catalog.toml"), "[foo]\nstable = \"1.0\"\n")
            .expect("must write catalog");
        let backend = Arc::new(LocalBackend::new(dir.path()));
        backend
            .install("foo", "stable", InstallFlags::empty(), &mut NullProgress)
            .expect("must install");

        let manager = SnapManager::with_runner(State::new(), backend, StubRunner::default());
        let err = run_kind(&manager, "purge-snap", Some(json!({"name": ".dev"}))).unwrap_err();

        assert_eq!(err.to_string(), "snap name must not be empty");
        assert!(dir.path().join("data/foo/1.0").is_dir());
    }

    #[test]
    fn missing_payload_fails_without_backend_call() {
        let backend = Arc::new(RecordingBackend::default());
        let manager = manager_with(backend.clone());

        let err = run_kind(&manager, "remove-snap", None).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StateError>(),
            Some(StateError::NoState { .. })
        ));
        assert!(backend.calls().is_empty());
        assert!(manager.state().try_lock().is_some());
    }

    #[test]
    fn undecodable_payload_fails_without_backend_call() {
        let backend = Arc::new(RecordingBackend::default());
        let manager = manager_with(backend.clone());

        let err = run_kind(&manager, "install-snap", Some(json!({"name": 5}))).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StateError>(),
            Some(StateError::Decode { .. })
        ));
        assert!(backend.calls().is_empty());
        assert!(manager.state().try_lock().is_some());
    }

    #[test]
    fn backend_error_is_returned_unchanged() {
        let backend = Arc::new(RecordingBackend::failing());
        let manager = manager_with(backend.clone());

        for (kind, payload) in [
            ("install-snap", json!({"name": "foo.bar", "channel": "stable"})),
            ("remove-snap", json!({"name": "foo.bar"})),
            ("set-active-snap", json!({"name": "foo.bar", "active": false})),
        ] {
            let err = run_kind(&manager, kind, Some(payload)).unwrap_err();
            assert!(err.downcast_ref::<Conflict>().is_some(), "{kind}: {err}");
            assert!(err.to_string().starts_with("conflicting change in progress for foo"));
            assert_eq!(err.chain().count(), 1);
        }
    }

    #[test]
    fn lock_is_released_during_backend_call() {
        let state = State::new();
        let backend = Arc::new(RecordingBackend::watching(&state));
        let manager = SnapManager::with_runner(state, backend.clone(), StubRunner::default());

        for (kind, payload) in [
            ("install-snap", json!({"name": "foo", "channel": "stable"})),
            ("update-snap", json!({"name": "foo", "channel": "stable"})),
            ("remove-snap", json!({"name": "foo"})),
            ("purge-snap", json!({"name": "foo"})),
            ("rollback-snap", json!({"name": "foo"})),
            ("set-active-snap", json!({"name": "foo", "active": true})),
        ] {
            run_kind(&manager, kind, Some(payload)).expect("must succeed");
        }

        let observed = backend.lock_free.lock().clone();
        assert_eq!(observed, vec![true; 6]);
    }

    #[test]
    fn fake_handlers_ignore_payload_and_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let manager = manager_with(backend.clone());

        run_kind(&manager, "fake-install-snap", None).expect("must succeed");
        let err = run_kind(&manager, "fake-install-snap-error", None).unwrap_err();
        assert_eq!(err.to_string(), "fake-install-snap-error errored");
        let err = run_kind(
            &manager,
            "fake-install-snap-error",
            Some(json!({"name": "foo"})),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), FAKE_INSTALL_ERROR);

        assert!(backend.calls().is_empty());
    }

    #[test]
    fn lifecycle_forwards_to_runner() {
        let manager = manager_with(Arc::new(RecordingBackend::default()));

        manager.ensure().expect("ensure never fails");
        manager.wait();
        manager.stop();

        assert_eq!(*manager.runner().calls.lock(), vec!["ensure", "wait", "stop"]);
    }

    #[test]
    fn payload_flags_are_omitted_when_zero() {
        let inst = InstallState {
            name: "foo".into(),
            channel: "stable".into(),
            flags: InstallFlags::empty(),
        };
        assert_eq!(
            serde_json::to_value(&inst).expect("must encode"),
            json!({"name": "foo", "channel": "stable"})
        );

        let rm = RemoveState {
            name: "foo".into(),
            flags: RemoveFlags::DO_REMOVE_GC,
        };
        assert_eq!(
            serde_json::to_value(&rm).expect("must encode"),
            json!({"name": "foo", "flags": 1})
        );

        let rollback = RollbackState {
            name: "foo".into(),
            version: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&rollback).expect("must encode"),
            json!({"name": "foo"})
        );
    }

    #[test]
    fn runs_tasks_through_task_runner() {
        let state = State::new();
        let backend = Arc::new(RecordingBackend::default());
        let manager =
            SnapManager::with_backend(state.clone(), backend.clone(), 2).expect("must build");

        {
            let mut st = state.lock();
            let install = st.new_task(&state, "install-snap", "Install foo");
            install
                .set(&mut st, STATE_KEY, &json!({"name": "foo.bar", "channel": "stable"}))
                .expect("must set");
            st.new_task(&state, "fake-install-snap-error", "Fail");
        }

        manager.ensure().expect("must ensure");
        manager.wait();
        manager.stop();

        let st = state.lock();
        let tasks = st.tasks(&state);
        assert_eq!(tasks[0].status(&st), Status::Done);
        assert_eq!(tasks[1].status(&st), Status::Error);
        assert!(tasks[1].log(&st)[0].ends_with(FAKE_INSTALL_ERROR));
        assert_eq!(
            backend.calls(),
            vec![Call::Install(
                "foo.bar".into(),
                "stable".into(),
                InstallFlags::empty()
            )]
        );
    }
}
