//! Error types for the concurrency primitives.
//!
//! Blocking reads surface [`FutureError`]; everything else only ever reports
//! bookkeeping conditions ([`AlreadyResolved`], [`PoolError`]).

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure of a [`Latch`](crate::Latch) wait.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("wait was interrupted")]
    Interrupted,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure of a blocking read on a [`SettableFuture`](crate::SettableFuture).
#[derive(Error, Debug)]
pub enum FutureError<E> {
    #[error("wait was interrupted")]
    Interrupted,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The work itself failed; the work's error is shared, not copied.
    #[error("execution failed: {0}")]
    ExecutionFailed(Arc<E>),

    #[error("future was cancelled")]
    Cancelled,
}

impl<E> FutureError<E> {
    /// The stored failure, if this is `ExecutionFailed`.
    pub fn cause(&self) -> Option<&E> {
        match self {
            FutureError::ExecutionFailed(cause) => Some(cause),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FutureError::Timeout(_))
    }
}

impl<E> Clone for FutureError<E> {
    fn clone(&self) -> Self {
        match self {
            FutureError::Interrupted => FutureError::Interrupted,
            FutureError::Timeout(after) => FutureError::Timeout(*after),
            FutureError::ExecutionFailed(cause) => FutureError::ExecutionFailed(Arc::clone(cause)),
            FutureError::Cancelled => FutureError::Cancelled,
        }
    }
}

impl<E> From<WaitError> for FutureError<E> {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Interrupted => FutureError::Interrupted,
            WaitError::Timeout(after) => FutureError::Timeout(after),
        }
    }
}

/// Returned when a future that already holds an outcome is resolved again.
///
/// This is a programming error on the resolver's side: the first outcome is
/// kept and the rejected one is dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("future has already been resolved")]
#[must_use]
pub struct AlreadyResolved;

/// Failures reported by worker pools and executors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool has already started; hooks must be set before the first submission")]
    AlreadyStarted,

    #[error("executor has been shut down")]
    ShutDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error(transparent)]
    Config(#[from] core_runtime::Error),
}

pub type Result<T> = std::result::Result<T, PoolError>;
