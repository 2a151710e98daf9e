//! At-most-once background task execution with logical-time invalidation
//!
//! A [`TaskManager`] keeps at most one run per task key. Callers poll for the
//! result of a run with [`TaskManager::consume_result`]; a missing or stale run
//! is (re)started in the background and the caller is told to come back on a
//! later reconciliation pass.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Monotonic counter supplied by the caller, typically the resource generation
pub type LogicalTime = i64;

/// A named, idempotent unit of deferred work
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Identifies the task; at most one run per key is tracked
    fn key(&self) -> String;

    async fn run(&self) -> Result<Self::Output>;
}

type Outcome = Result<Box<dyn Any + Send>>;

enum RunState {
    Running(AbortHandle),
    Done(Outcome),
}

struct TaskRun {
    id: u64,
    time: LogicalTime,
    task: Arc<dyn Any + Send + Sync>,
    state: RunState,
}

impl TaskRun {
    fn is_fresh(&self, as_of: LogicalTime) -> bool {
        self.time >= as_of
    }
}

#[derive(Default)]
struct Inner {
    runs: Mutex<HashMap<String, TaskRun>>,
    next_id: AtomicU64,
}

impl Inner {
    // Nothing panics while the lock is held, a poisoned map is still consistent.
    fn runs(&self) -> MutexGuard<'_, HashMap<String, TaskRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Executes tasks in the background and hands out each result at most once
#[derive(Clone, Default)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `task` in the background, tagged with logical time `time`.
    ///
    /// Any previous run for the same key is replaced: if it is still running it
    /// is aborted, and an unconsumed result is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run<T: Task>(&self, task: Arc<T>, time: LogicalTime) {
        let key = task.key();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let runner = Arc::clone(&task);
        let run_key = key.clone();

        // Hold the lock across spawn so the run cannot publish before it is registered.
        let mut runs = self.inner.runs();
        let handle = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(runner.run()).catch_unwind().await {
                Ok(Ok(value)) => Ok(Box::new(value) as Box<dyn Any + Send>),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    warn!("Task {} panicked", run_key);
                    Err(Error::TaskPanicked(run_key.clone()))
                }
            };
            publish(&inner, &run_key, id, outcome);
        });

        let previous = runs.insert(
            key.clone(),
            TaskRun {
                id,
                time,
                task: task as Arc<dyn Any + Send + Sync>,
                state: RunState::Running(handle.abort_handle()),
            },
        );
        drop(runs);

        if let Some(TaskRun {
            state: RunState::Running(previous),
            ..
        }) = previous
        {
            debug!("Aborting superseded run of task {}", key);
            previous.abort();
        }
    }

    /// Take the result of `task` if a run at least as recent as `as_of` has completed.
    ///
    /// Returns `None` when the result is not ready. If there is no run for the
    /// key, or the stored run is older than `as_of`, a new run is started. A
    /// returned result is removed, so a second call starts over.
    pub fn consume_result<T: Task>(
        &self,
        task: &Arc<T>,
        as_of: LogicalTime,
    ) -> Option<Result<T::Output>> {
        let key = task.key();
        let mut runs = self.inner.runs();
        let fresh = runs
            .get(&key)
            .filter(|run| run.is_fresh(as_of))
            .map(|run| matches!(run.state, RunState::Running(_)));
        match fresh {
            // a recent enough run is still in flight, do not start another one
            Some(true) => return None,
            Some(false) => {}
            None => {
                drop(runs);
                self.run(Arc::clone(task), as_of);
                return None;
            }
        }

        let run = runs.remove(&key)?;
        drop(runs);
        match run.state {
            RunState::Done(Ok(value)) => match value.downcast::<T::Output>() {
                Ok(value) => Some(Ok(*value)),
                Err(_) => Some(Err(Error::TaskOutputMismatch(key))),
            },
            RunState::Done(Err(e)) => Some(Err(e)),
            RunState::Running(_) => None,
        }
    }

    /// The task registered under the key of `task`, if it is at least as recent as `as_of`.
    /// Never starts a run and never consumes a result.
    pub fn peek<T: Task>(&self, task: &T, as_of: LogicalTime) -> Option<Arc<T>> {
        let runs = self.inner.runs();
        let run = runs.get(&task.key()).filter(|r| r.is_fresh(as_of))?;
        Arc::clone(&run.task).downcast::<T>().ok()
    }

    /// Number of tracked runs, finished or not
    pub fn len(&self) -> usize {
        self.inner.runs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store the outcome of run `id` unless it has been superseded meanwhile
fn publish(inner: &Inner, key: &str, id: u64, outcome: Outcome) {
    let mut runs = inner.runs();
    match runs.get_mut(key) {
        Some(run) if run.id == id => run.state = RunState::Done(outcome),
        _ => debug!("Discarding result of superseded run of task {}", key),
    }
}
