//! Per-thread interruption of blocking waits.
//!
//! Every thread owns an interrupt flag. Another thread holding that thread's
//! [`InterruptHandle`] can raise the flag; if the target is blocked in
//! [`Latch::wait`](crate::Latch::wait) (or anything built on it, such as
//! [`SettableFuture::get`](crate::SettableFuture::get)) it is woken and the wait
//! fails with `Interrupted`. A failed wait consumes the flag. Waits that begin
//! while the flag is raised fail immediately, so an interrupt sent just before
//! the target starts waiting is never lost.
//!
//! ```
//! use core_concurrent::{interrupt, Latch, WaitError};
//! use std::sync::mpsc;
//! use std::thread;
//!
//! let latch = Latch::new();
//! let waiter_latch = latch.clone();
//! let (tx, rx) = mpsc::channel();
//!
//! let waiter = thread::spawn(move || {
//!     tx.send(interrupt::current()).unwrap();
//!     waiter_latch.wait()
//! });
//!
//! rx.recv().unwrap().interrupt();
//! assert_eq!(waiter.join().unwrap(), Err(WaitError::Interrupted));
//! assert!(!latch.is_released());
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Something a thread can be blocked on that an interrupt must be able to wake.
pub(crate) trait Wake: Send + Sync {
    fn wake_waiters(&self);
}

#[derive(Default)]
struct ThreadInterrupt {
    flag: AtomicBool,
    blocked_on: Mutex<Option<Weak<dyn Wake>>>,
}

impl ThreadInterrupt {
    fn set_blocked_on(&self, target: Option<Weak<dyn Wake>>) {
        *self.blocked_on.lock() = target;
    }
}

thread_local! {
    static CURRENT: Arc<ThreadInterrupt> = Arc::new(ThreadInterrupt::default());
}

/// A handle that can interrupt the blocking waits of one particular thread.
#[derive(Clone)]
pub struct InterruptHandle {
    state: Arc<ThreadInterrupt>,
}

impl InterruptHandle {
    /// Raise the target thread's interrupt flag and wake it if it is blocked.
    pub fn interrupt(&self) {
        self.state.flag.store(true, Ordering::SeqCst);

        let target = self.state.blocked_on.lock().clone();

        if let Some(target) = target.and_then(|weak| weak.upgrade()) {
            target.wake_waiters();
        }
    }

    /// Whether the target thread's flag is currently raised.
    pub fn is_interrupted(&self) -> bool {
        self.state.flag.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Handle for the calling thread.
pub fn current() -> InterruptHandle {
    CURRENT.with(|state| InterruptHandle {
        state: Arc::clone(state),
    })
}

/// Test and clear the calling thread's interrupt flag.
pub fn interrupted() -> bool {
    CURRENT.with(|state| state.flag.swap(false, Ordering::SeqCst))
}

/// Whether the calling thread's interrupt flag is raised, without clearing it.
pub fn is_interrupted() -> bool {
    CURRENT.with(|state| state.flag.load(Ordering::SeqCst))
}

/// Records what the calling thread is about to block on; cleared on drop.
///
/// Must be created before the waiter takes the lock it sleeps under, and
/// dropped after releasing it.
pub(crate) struct Registration {
    state: Arc<ThreadInterrupt>,
}

impl Registration {
    /// Consume a pending interrupt, if any.
    pub(crate) fn take_interrupt(&self) -> bool {
        self.state.flag.swap(false, Ordering::SeqCst)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state.set_blocked_on(None);
    }
}

pub(crate) fn register(target: Weak<dyn Wake>) -> Registration {
    let state = CURRENT.with(Arc::clone);
    state.set_blocked_on(Some(target));
    Registration { state }
}
