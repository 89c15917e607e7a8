//! Background worker pools.
//!
//! A [`WorkerPool`] runs deferred work on a fixed set of named OS threads and
//! hands back a [`SettableFuture`] per submission. Threads are started lazily,
//! exactly once, by the first submission; until then the pool can still be
//! given per-thread initializer and finalizer hooks.
//!
//! Work is a closure returning `anyhow::Result<T>`. A returned error, or a
//! panic inside the closure, fails the future; the worker thread itself keeps
//! running. Work whose future is already resolved (usually cancelled) when a
//! worker picks it up is skipped; work that has started always runs to
//! completion.
//!
//! The process-wide instance lives in [`shared`].
//!
//! # Examples
//!
//! ```
//! use core_concurrent::WorkerPool;
//! use core_runtime::PoolConfig;
//! use std::time::Duration;
//!
//! let pool = WorkerPool::new(PoolConfig::builder().worker_count(2).build().unwrap());
//!
//! let answer = pool.submit(|| Ok(6 * 7));
//! let later = pool.schedule(|| Ok("later"), Duration::from_millis(10));
//!
//! assert_eq!(answer.get().unwrap(), 42);
//! assert_eq!(later.get().unwrap(), "later");
//! pool.shutdown();
//! ```

use crate::error::{PoolError, Result};
use crate::executor::{Executor, Task};
use crate::future::SettableFuture;
use core_runtime::PoolConfig;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Per-thread hook run by every worker at start-up or exit.
pub type Hook = Arc<dyn Fn() + Send + Sync + 'static>;

struct Job {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    // Reversed so the max-heap yields the earliest deadline, FIFO among equals.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    jobs: BinaryHeap<Job>,
    next_seq: u64,
    closed: bool,
}

/// Deadline-ordered job queue shared by the workers of one pool.
#[derive(Default)]
struct DelayQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl DelayQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    /// Enqueue `task` to become runnable after `delay`; hands it back if closed.
    fn push(&self, task: Task, delay: Duration) -> std::result::Result<(), Task> {
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or(now + Duration::from_secs(u32::MAX as u64));

        let mut state = self.lock();
        if state.closed {
            return Err(task);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.push(Job {
            deadline,
            seq,
            task,
        });
        self.available.notify_one();
        Ok(())
    }

    /// Block until a job is due. Returns `None` once closed and empty.
    fn pop(&self) -> Option<Task> {
        let mut state = self.lock();
        loop {
            let next_deadline = state.jobs.peek().map(|job| job.deadline);
            match next_deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        let job = state.jobs.pop()?;
                        if !state.jobs.is_empty() {
                            // Let another worker look at the new head.
                            self.available.notify_one();
                        }
                        return Some(job.task);
                    }
                    self.available.wait_until(&mut state, deadline);
                }
                None if state.closed => return None,
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Stop accepting jobs; queued jobs still run.
    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.available.notify_all();
    }

    fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[derive(Default)]
struct Lifecycle {
    initializer: Option<Hook>,
    finalizer: Option<Hook>,
    started: bool,
    workers: Vec<JoinHandle<()>>,
}

/// A fixed-size pool of background worker threads.
pub struct WorkerPool {
    config: PoolConfig,
    queue: Arc<DelayQueue>,
    started: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl WorkerPool {
    /// Create a pool. No thread is spawned until the first submission.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            queue: Arc::new(DelayQueue::default()),
            started: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether worker threads have been started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Number of queued jobs not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock()
    }

    /// Set a hook that every worker thread runs once before its first job.
    ///
    /// A panicking initializer is fatal to the worker thread that ran it.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyStarted` once the pool has started.
    pub fn set_initializer<F>(&self, hook: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut lifecycle = self.lifecycle();
        if lifecycle.started {
            return Err(PoolError::AlreadyStarted);
        }
        lifecycle.initializer = Some(Arc::new(hook));
        Ok(())
    }

    /// Set a hook that every worker thread runs once as it exits.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyStarted` once the pool has started.
    pub fn set_finalizer<F>(&self, hook: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut lifecycle = self.lifecycle();
        if lifecycle.started {
            return Err(PoolError::AlreadyStarted);
        }
        lifecycle.finalizer = Some(Arc::new(hook));
        Ok(())
    }

    fn ensure_started(&self) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }

        let mut lifecycle = self.lifecycle();
        if lifecycle.started {
            return Ok(());
        }

        for index in 1..=self.config.worker_count {
            let worker = Worker {
                queue: Arc::clone(&self.queue),
                initializer: lifecycle.initializer.clone(),
                finalizer: lifecycle.finalizer.clone(),
            };
            match self.config.thread_builder(index).spawn(move || worker.run()) {
                Ok(handle) => lifecycle.workers.push(handle),
                Err(err) if lifecycle.workers.is_empty() => {
                    return Err(PoolError::Spawn(err.to_string()));
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        spawned = lifecycle.workers.len(),
                        requested = self.config.worker_count,
                        "Worker pool started with fewer threads than configured"
                    );
                    break;
                }
            }
        }

        lifecycle.started = true;
        self.started.store(true, Ordering::Release);
        debug!(
            workers = lifecycle.workers.len(),
            prefix = %self.config.thread_name_prefix,
            "Worker pool started"
        );
        Ok(())
    }

    /// Run `work` on a worker as soon as possible.
    pub fn submit<T, F>(&self, work: F) -> SettableFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.schedule(work, Duration::ZERO)
    }

    /// Run `work` on a worker once at least `delay` has elapsed.
    ///
    /// Starts the pool if needed. The returned future fails with
    /// `PoolError::ShutDown` if the pool no longer accepts work.
    pub fn schedule<T, F>(&self, work: F, delay: Duration) -> SettableFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let future = SettableFuture::new();

        if self.queue.is_closed() {
            warn!("Work submitted to a worker pool that has been shut down");
            let _ = future.try_fail(PoolError::ShutDown.into());
            return future;
        }

        if let Err(err) = self.ensure_started() {
            error!(error = %err, "Worker pool failed to start");
            let _ = future.try_fail(err.into());
            return future;
        }

        let job_future = future.clone();
        let task: Task = Box::new(move || run_work(&job_future, work));
        if self.queue.push(task, delay).is_err() {
            warn!("Work submitted to a worker pool that has been shut down");
            let _ = future.try_fail(PoolError::ShutDown.into());
        }

        future
    }

    /// Stop accepting work, let queued work (delayed jobs included) finish,
    /// and join the workers. Finalizers run as each worker exits.
    ///
    /// When called from one of the pool's own workers, that worker is not
    /// joined.
    pub fn shutdown(&self) {
        self.queue.close();

        let workers = std::mem::take(&mut self.lifecycle().workers);
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("Worker thread terminated by a panic");
            }
        }
        debug!(prefix = %self.config.thread_name_prefix, "Worker pool shut down");
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) -> Result<()> {
        if self.queue.is_closed() {
            return Err(PoolError::ShutDown);
        }
        self.ensure_started()?;
        self.queue
            .push(task, Duration::ZERO)
            .map_err(|_| PoolError::ShutDown)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers drain the queue and exit on their own.
        self.queue.close();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("started", &self.is_started())
            .field("queued", &self.queued())
            .finish()
    }
}

pub(crate) fn run_work<T, F>(future: &SettableFuture<T>, work: F)
where
    F: FnOnce() -> anyhow::Result<T>,
{
    if future.is_done() {
        debug!("Skipping work whose future was resolved before it started");
        return;
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        Err(anyhow::anyhow!(
            "task panicked: {}",
            panic_message(payload.as_ref())
        ))
    });

    let accepted = match outcome {
        Ok(value) => future.try_complete(value),
        Err(err) => future.try_fail(err),
    };
    if !accepted {
        debug!("Discarding outcome of work whose future was resolved while it ran");
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

struct Worker {
    queue: Arc<DelayQueue>,
    initializer: Option<Hook>,
    finalizer: Option<Hook>,
}

/// Runs the finalizer however the worker loop ends.
struct FinalizerGuard(Option<Hook>);

impl Drop for FinalizerGuard {
    fn drop(&mut self) {
        if let Some(finalizer) = self.0.take() {
            if panic::catch_unwind(AssertUnwindSafe(|| finalizer())).is_err() {
                error!("Worker finalizer panicked");
            }
        }
    }
}

impl Worker {
    fn run(self) {
        if let Some(initializer) = &self.initializer {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| initializer())) {
                error!(
                    panic = panic_message(payload.as_ref()),
                    "Worker initializer panicked; worker thread exits"
                );
                panic::resume_unwind(payload);
            }
        }

        let _finalizer = FinalizerGuard(self.finalizer.clone());
        debug!("Worker started");

        while let Some(task) = self.queue.pop() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                error!(
                    panic = panic_message(payload.as_ref()),
                    "Uncaught panic in pool task"
                );
            }
        }

        debug!("Worker exiting");
    }
}

/// The process-wide shared pool.
///
/// Constructed on first access, its threads are started by the first
/// submission and then live for the rest of the process. Rust does not wait
/// for spawned threads at exit, so the workers never hold the process open.
/// The finalizer hook only runs when a worker exits, which for this pool
/// means an explicit call to [`shutdown`](shared::shutdown).
///
/// Hooks (and [`configure`](shared::configure)) must be set before the first
/// submission.
pub mod shared {
    use super::WorkerPool;
    use crate::error::{PoolError, Result};
    use crate::executor::{Executor, Task};
    use crate::future::SettableFuture;
    use core_runtime::PoolConfig;
    use std::sync::OnceLock;
    use std::time::Duration;

    const THREAD_NAME_PREFIX: &str = "shared-pool-worker";

    static POOL: OnceLock<WorkerPool> = OnceLock::new();

    fn default_config() -> PoolConfig {
        PoolConfig {
            thread_name_prefix: THREAD_NAME_PREFIX.to_string(),
            ..PoolConfig::default()
        }
    }

    /// The shared pool instance.
    pub fn pool() -> &'static WorkerPool {
        POOL.get_or_init(|| WorkerPool::new(default_config()))
    }

    /// Replace the default configuration. Only possible before anything else
    /// touches the shared pool.
    ///
    /// # Errors
    ///
    /// - `PoolError::AlreadyStarted` if the shared pool already exists
    /// - `PoolError::Config` if `config` is invalid
    pub fn configure(config: PoolConfig) -> Result<()> {
        config.validate()?;
        POOL.set(WorkerPool::new(config))
            .map_err(|_| PoolError::AlreadyStarted)
    }

    /// See [`WorkerPool::set_initializer`].
    pub fn set_initializer<F>(hook: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        pool().set_initializer(hook)
    }

    /// See [`WorkerPool::set_finalizer`].
    pub fn set_finalizer<F>(hook: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        pool().set_finalizer(hook)
    }

    /// See [`WorkerPool::submit`].
    pub fn submit<T, F>(work: F) -> SettableFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        pool().submit(work)
    }

    /// See [`WorkerPool::schedule`].
    pub fn schedule<T, F>(work: F, delay: Duration) -> SettableFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        pool().schedule(work, delay)
    }

    /// Drain and stop the shared pool, running the finalizer on every worker.
    ///
    /// Meant to be called once, right before process exit; later submissions
    /// fail with `PoolError::ShutDown`.
    pub fn shutdown() {
        if let Some(pool) = POOL.get() {
            pool.shutdown();
        }
    }

    /// [`Executor`] handle that dispatches onto the shared pool.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SharedPoolExecutor;

    impl Executor for SharedPoolExecutor {
        fn execute(&self, task: Task) -> Result<()> {
            pool().execute(task)
        }
    }
}
