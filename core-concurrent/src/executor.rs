//! Execution contexts for deferred callbacks.
//!
//! An [`Executor`] is anything that can be handed a [`Task`] and will run it,
//! inline or on some other thread. Listeners registered on a
//! [`SettableFuture`](crate::SettableFuture) are dispatched through one.
//!
//! - [`DirectExecutor`]: runs the task on the calling thread
//! - [`TokioExecutor`]: runs the task on a Tokio runtime's blocking pool
//! - [`WorkerPool`](crate::WorkerPool) and
//!   [`SingleThreadExecutor`](crate::SingleThreadExecutor) also implement it

use crate::error::Result;
use std::sync::Arc;

/// A unit of fire-and-forget work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run a [`Task`].
pub trait Executor: Send + Sync {
    /// Run `task`, now or later.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutDown` if the executor no longer accepts work.
    /// The task is dropped without running in that case.
    fn execute(&self, task: Task) -> Result<()>;
}

impl<X: Executor + ?Sized> Executor for Arc<X> {
    fn execute(&self, task: Task) -> Result<()> {
        (**self).execute(task)
    }
}

impl<X: Executor + ?Sized> Executor for &X {
    fn execute(&self, task: Task) -> Result<()> {
        (**self).execute(task)
    }
}

/// Runs every task immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        task();
        Ok(())
    }
}

/// Runs tasks on a Tokio runtime via `spawn_blocking`.
///
/// Useful for listeners that must not run on the resolving thread but should
/// not occupy a toolbox worker either.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Executor bound to the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        // The JoinHandle is not needed; dropping it detaches the task.
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}
