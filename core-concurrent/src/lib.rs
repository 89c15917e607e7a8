//! Blocking concurrency primitives for the toolbox.
//!
//! This crate provides three building blocks for handing work and results
//! between threads without committing callers to an async runtime:
//! - [`Latch`]: a binary, single-release wait primitive
//! - [`SettableFuture`]: a write-once result cell with blocking reads and
//!   completion listeners
//! - [`WorkerPool`]: a lazily started pool of named worker threads with
//!   per-thread initializer and finalizer hooks, plus a process-wide shared
//!   instance in [`shared`]
//!
//! # Modules
//!
//! - `latch`: the release-once latch
//! - `future`: single-assignment futures
//! - `executor`: the [`Executor`] abstraction used to dispatch listeners
//! - `pool`: worker pools and the shared pool
//! - `single_thread`: a minimal ordered executor
//! - `interrupt`: per-thread interruption of blocking waits
//!
//! # Examples
//!
//! ```rust
//! use core_concurrent::{shared, DirectExecutor};
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! let future = shared::submit(|| Ok(6 * 7));
//! future.add_listener(move || tx.send("resolved").unwrap(), DirectExecutor);
//!
//! assert_eq!(future.get().unwrap(), 42);
//! assert_eq!(rx.recv().unwrap(), "resolved");
//! ```
//!
//! Blocking calls never spin; they park on a condition variable and return
//! `Interrupted` if another thread [interrupts](interrupt::InterruptHandle)
//! the waiter.

pub mod error;
pub mod executor;
pub mod future;
pub mod interrupt;
pub mod latch;
pub mod pool;
pub mod single_thread;

pub use error::{AlreadyResolved, FutureError, PoolError, Result, WaitError};
pub use executor::{DirectExecutor, Executor, Task, TokioExecutor};
pub use future::{FutureState, SettableFuture};
pub use interrupt::InterruptHandle;
pub use latch::Latch;
pub use pool::{shared, Hook, WorkerPool};
pub use single_thread::SingleThreadExecutor;
