use super::{State, Status, Task};
use anyhow::{anyhow, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Function invoked by a runner for every task of the kind it is registered for
pub type Handler = Arc<dyn Fn(&Task, &CancelToken) -> Result<()> + Send + Sync>;

/// Box a closure as a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Task, &CancelToken) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Cooperative cancellation signal shared between a runner and its handlers
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Execution engine that routes tasks to handlers by kind
pub trait Runner: Send + Sync {
    /// Register the handler for `kind`. Must happen before the first `ensure`.
    fn add_handler(&mut self, kind: &str, handler: Handler);

    /// Start every runnable task that is not already in flight
    fn ensure(&self);

    /// Block until no handler is running
    fn wait(&self);

    /// Cancel, then wait for in-flight handlers to return
    fn stop(&self);
}

#[derive(Default)]
struct InFlight {
    running: Mutex<HashSet<u64>>,
    idle: Condvar,
}

impl InFlight {
    fn finish(&self, id: u64) {
        let mut running = self.running.lock();
        running.remove(&id);
        if running.is_empty() {
            self.idle.notify_all();
        }
    }
}

/// Runner backed by a rayon thread pool, one worker per runnable task
pub struct TaskRunner {
    state: State,
    handlers: HashMap<String, Handler>,
    pool: rayon::ThreadPool,
    cancel: CancelToken,
    in_flight: Arc<InFlight>,
}

impl TaskRunner {
    pub fn new(state: State, max_parallel: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_parallel)
            .thread_name(|i| format!("task-runner-{i}"))
            .build()?;

        Ok(Self {
            state,
            handlers: HashMap::new(),
            pool,
            cancel: CancelToken::new(),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    fn spawn(&self, task: Task, handler: Handler) {
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let in_flight = Arc::clone(&self.in_flight);

        self.pool.spawn(move || {
            let outcome = if cancel.is_cancelled() {
                None
            } else {
                log::debug!("Running task {}", task.id());
                Some(
                    panic::catch_unwind(AssertUnwindSafe(|| handler(&task, &cancel)))
                        .unwrap_or_else(|_| Err(anyhow!("handler panicked"))),
                )
            };

            {
                let mut st = state.lock();
                match outcome {
                    None => {
                        log::debug!("Task {} cancelled before start", task.id());
                        task.set_status(&mut st, Status::Do);
                    }
                    Some(Ok(())) => {
                        log::info!("✓ Task {} ({}) done", task.id(), task.kind(&st));
                        task.set_status(&mut st, Status::Done);
                    }
                    Some(Err(err)) => {
                        log::warn!("Task {} ({}) failed: {:#}", task.id(), task.kind(&st), err);
                        task.errorf(&mut st, format_args!("{err:#}"));
                        task.set_status(&mut st, Status::Error);
                    }
                }
            }

            in_flight.finish(task.id());
        });
    }
}

impl Runner for TaskRunner {
    fn add_handler(&mut self, kind: &str, handler: Handler) {
        if self.handlers.insert(kind.to_string(), handler).is_some() {
            panic!("handler for task kind {kind:?} registered twice");
        }
    }

    fn ensure(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        let mut st = self.state.lock();
        let mut running = self.in_flight.running.lock();

        for task in st.tasks(&self.state) {
            if task.status(&st) != Status::Do {
                continue;
            }
            let Some(handler) = self.handlers.get(&task.kind(&st)) else {
                continue;
            };
            if !running.insert(task.id()) {
                continue;
            }

            task.set_status(&mut st, Status::Doing);
            self.spawn(task, Arc::clone(handler));
        }
    }

    fn wait(&self) {
        let mut running = self.in_flight.running.lock();
        while !running.is_empty() {
            self.in_flight.idle.wait(&mut running);
        }
    }

    fn stop(&self) {
        self.cancel.cancel();
        self.wait();
    }
}
