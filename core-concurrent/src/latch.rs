//! A single-release blocking latch.
//!
//! A [`Latch`] starts pending and is released at most once; the release is
//! permanent. Threads calling [`Latch::wait`] block until that happens. Every
//! wake-up re-checks the released flag under the latch's mutex, so spurious
//! wake-ups and stray notifications never let a waiter through early.
//!
//! [`Latch::release`] lets one arbitrarily chosen waiter continue, which is
//! enough when the latch synchronizes exactly two threads. Use
//! [`Latch::release_all`] when several threads may be waiting. Threads that
//! start waiting after either call return immediately.
//!
//! # Examples
//!
//! ```
//! use core_concurrent::Latch;
//! use std::thread;
//!
//! let latch = Latch::new();
//! let worker_latch = latch.clone();
//!
//! let worker = thread::spawn(move || {
//!     // ... produce something ...
//!     worker_latch.release();
//! });
//!
//! latch.wait().unwrap();
//! assert!(latch.is_released());
//! worker.join().unwrap();
//! ```

use crate::error::WaitError;
use crate::interrupt::{self, Wake};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

struct LatchState {
    released: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl LatchState {
    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn open(&self, all: bool) {
        let _guard = self.lock.lock();
        self.released.store(true, Ordering::Release);
        if all {
            self.cond.notify_all();
        } else {
            self.cond.notify_one();
        }
    }
}

impl Wake for LatchState {
    fn wake_waiters(&self) {
        // Taking the lock orders this wake-up after a waiter's flag check.
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }
}

/// Binary, single-release wait primitive.
///
/// Clones share the same underlying latch.
#[derive(Clone)]
pub struct Latch {
    state: Arc<LatchState>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    /// Create a pending latch.
    pub fn new() -> Self {
        Self {
            state: Arc::new(LatchState {
                released: AtomicBool::new(false),
                lock: Mutex::new(()),
                cond: Condvar::new(),
            }),
        }
    }

    fn register_interrupt(&self) -> interrupt::Registration {
        let weak: Weak<LatchState> = Arc::downgrade(&self.state);
        interrupt::register(weak)
    }

    /// Block until this latch is released.
    ///
    /// # Errors
    ///
    /// Returns `WaitError::Interrupted` if the calling thread is
    /// [interrupted](crate::interrupt) before the release is observed.
    pub fn wait(&self) -> Result<(), WaitError> {
        if self.state.is_released() {
            return Ok(());
        }

        let registration = self.register_interrupt();
        let mut guard = self.state.lock.lock();
        loop {
            if self.state.is_released() {
                return Ok(());
            }
            if registration.take_interrupt() {
                return Err(WaitError::Interrupted);
            }
            self.state.cond.wait(&mut guard);
        }
    }

    /// Block until this latch is released, for at most `timeout` in total.
    ///
    /// The budget is tracked against a fixed deadline, so repeated wake-ups
    /// never extend the overall wait.
    ///
    /// # Errors
    ///
    /// - `WaitError::Timeout` if the deadline passes first
    /// - `WaitError::Interrupted` if the calling thread is interrupted
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), WaitError> {
        if self.state.is_released() {
            return Ok(());
        }

        let Some(deadline) = Instant::now().checked_add(timeout) else {
            // Unrepresentable deadline: no practical difference from waiting forever.
            return self.wait();
        };

        let registration = self.register_interrupt();
        let mut guard = self.state.lock.lock();
        loop {
            if self.state.is_released() {
                return Ok(());
            }
            if registration.take_interrupt() {
                return Err(WaitError::Interrupted);
            }

            if Instant::now() >= deadline {
                return Err(WaitError::Timeout(timeout));
            }

            self.state.cond.wait_until(&mut guard, deadline);
        }
    }

    /// Block until this latch is released, ignoring interrupts.
    ///
    /// The calling thread's interrupt flag is left untouched, so an interrupt
    /// that arrives meanwhile is still visible to the caller afterwards.
    pub fn wait_uninterruptibly(&self) {
        let mut guard = self.state.lock.lock();
        while !self.state.is_released() {
            self.state.cond.wait(&mut guard);
        }
    }

    /// Release the latch and wake one waiting thread, if any.
    pub fn release(&self) {
        self.state.open(false);
    }

    /// Release the latch and wake every waiting thread.
    pub fn release_all(&self) {
        self.state.open(true);
    }

    /// Whether the latch has been released.
    pub fn is_released(&self) -> bool {
        self.state.is_released()
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch")
            .field("released", &self.is_released())
            .finish()
    }
}
