//! A minimal single-threaded executor.
//!
//! [`SingleThreadExecutor`] owns one named thread, spawned by the first
//! submission, that runs tasks strictly in submission order. An optional
//! operation delay makes the thread pause after every task, which is handy for
//! rate-limiting work against an external resource.
//!
//! Shutdown comes in two flavours: [`shutdown`](SingleThreadExecutor::shutdown)
//! lets queued tasks drain, [`shutdown_now`](SingleThreadExecutor::shutdown_now)
//! hands queued tasks back to the caller and interrupts the running one.

use crate::error::{PoolError, Result, WaitError};
use crate::executor::{Executor, Task};
use crate::future::SettableFuture;
use crate::interrupt::{self, InterruptHandle};
use crate::latch::Latch;
use crate::pool::{panic_message, run_work};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

static NEXT_DEFAULT_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Default)]
struct State {
    queue: VecDeque<Task>,
    started: bool,
    shutdown: bool,
    stop_now: bool,
    worker: Option<InterruptHandle>,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
    terminated: Latch,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    fn next_task(&self) -> Option<Task> {
        let mut state = self.lock();
        loop {
            if state.stop_now {
                return None;
            }
            if let Some(task) = state.queue.pop_front() {
                return Some(task);
            }
            if state.shutdown {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Sleep for `delay`, cut short by `shutdown_now`. A delay too large to
    /// express as a deadline lasts until then.
    fn pause(&self, delay: Duration) {
        let deadline = Instant::now().checked_add(delay);
        let mut state = self.lock();
        while !state.stop_now {
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    self.available.wait_until(&mut state, deadline);
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    fn run_worker(&self, operation_delay: Duration) {
        self.lock().worker = Some(interrupt::current());
        debug!("Single-thread executor started");

        while let Some(task) = self.next_task() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                error!(
                    panic = panic_message(payload.as_ref()),
                    "Uncaught panic in executor task"
                );
            }
            if !operation_delay.is_zero() {
                self.pause(operation_delay);
            }
        }

        self.lock().worker = None;
        self.terminated.release_all();
        debug!("Single-thread executor terminated");
    }
}

/// Runs tasks one at a time, in order, on a dedicated thread.
pub struct SingleThreadExecutor {
    name: String,
    operation_delay: Duration,
    shared: Arc<Shared>,
}

impl Default for SingleThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleThreadExecutor {
    /// Executor whose thread gets a generated name.
    pub fn new() -> Self {
        let id = NEXT_DEFAULT_ID.fetch_add(1, Ordering::Relaxed);
        Self::named(format!("single-thread-executor #{id}"))
    }

    /// Executor whose thread is called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation_delay: Duration::ZERO,
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                available: Condvar::new(),
                terminated: Latch::new(),
            }),
        }
    }

    /// Pause for `delay` after every task.
    pub fn with_operation_delay(mut self, delay: Duration) -> Self {
        self.operation_delay = delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `work` on the executor thread and expose its outcome as a future.
    ///
    /// After shutdown the future is failed with `PoolError::ShutDown`.
    pub fn submit<T, F>(&self, work: F) -> SettableFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let future = SettableFuture::new();
        let job_future = future.clone();
        if let Err(err) = self.execute(Box::new(move || run_work(&job_future, work))) {
            let _ = future.try_fail(err.into());
        }
        future
    }

    /// Stop accepting tasks. Already queued tasks still run.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        state.shutdown = true;
        if !state.started {
            self.shared.terminated.release_all();
        }
        self.shared.available.notify_all();
    }

    /// Stop accepting tasks, interrupt the running task and return the ones
    /// that never started.
    pub fn shutdown_now(&self) -> Vec<Task> {
        let (pending, worker) = {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.stop_now = true;
            if !state.started {
                self.shared.terminated.release_all();
            }
            self.shared.available.notify_all();
            (state.queue.drain(..).collect::<Vec<_>>(), state.worker.clone())
        };

        if let Some(worker) = worker {
            worker.interrupt();
        }
        debug!(
            executor = %self.name,
            discarded = pending.len(),
            "Single-thread executor stopped"
        );
        pending
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Whether the executor is shut down and its thread has finished.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.terminated.is_released()
    }

    /// Block until the executor terminates or `timeout` passes.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns `WaitError::Interrupted` if the calling thread is interrupted.
    pub fn await_termination(&self, timeout: Duration) -> std::result::Result<bool, WaitError> {
        match self.shared.terminated.wait_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(WaitError::Timeout(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl Executor for SingleThreadExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(PoolError::ShutDown);
        }

        if !state.started {
            let shared = Arc::clone(&self.shared);
            let delay = self.operation_delay;
            thread::Builder::new()
                .name(self.name.clone())
                .spawn(move || shared.run_worker(delay))
                .map_err(|err| PoolError::Spawn(err.to_string()))?;
            state.started = true;
        }

        state.queue.push_back(task);
        self.shared.available.notify_one();
        Ok(())
    }
}

impl Drop for SingleThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SingleThreadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("SingleThreadExecutor")
            .field("name", &self.name)
            .field("operation_delay", &self.operation_delay)
            .field("queued", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}
