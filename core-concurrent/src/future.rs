//! A single-assignment future.
//!
//! [`SettableFuture`] holds the eventual outcome of one unit of work: a value,
//! a failure, or a cancellation. The outcome is written at most once. Later
//! attempts are rejected with [`AlreadyResolved`] and never overwrite it.
//!
//! Readers can block with [`get`](SettableFuture::get) /
//! [`get_timeout`](SettableFuture::get_timeout), await with
//! [`resolved`](SettableFuture::resolved), or register listeners with
//! [`add_listener`](SettableFuture::add_listener).
//!
//! # Resolution order
//!
//! 1. The outcome slot is set (the single point where resolvers race).
//! 2. Only the winner releases the internal [`Latch`], waking every blocked
//!    reader.
//! 3. The winner drains the listener list and dispatches each listener in
//!    registration order.
//!
//! Draining marks the list closed under the same lock registrants take, so a
//! listener added concurrently is either drained by the resolver or sees the
//! closed list and dispatches itself. No listener is lost or run twice.
//!
//! # Examples
//!
//! ```
//! use core_concurrent::{DirectExecutor, SettableFuture};
//! use std::thread;
//!
//! let future: SettableFuture<u32, String> = SettableFuture::new();
//! future.add_listener(|| println!("resolved"), DirectExecutor);
//!
//! let producer = future.clone();
//! thread::spawn(move || producer.complete(42).unwrap());
//!
//! assert_eq!(future.get().unwrap(), 42);
//! ```

use crate::error::{AlreadyResolved, FutureError, WaitError};
use crate::executor::{Executor, Task};
use crate::latch::Latch;
use parking_lot::{Mutex, MutexGuard};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error};

/// Snapshot of a future's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

enum Outcome<T, E> {
    Succeeded(T),
    Failed(Arc<E>),
    Cancelled,
}

impl<T: Clone, E> Outcome<T, E> {
    fn to_result(&self) -> Result<T, FutureError<E>> {
        match self {
            Outcome::Succeeded(value) => Ok(value.clone()),
            Outcome::Failed(cause) => Err(FutureError::ExecutionFailed(Arc::clone(cause))),
            Outcome::Cancelled => Err(FutureError::Cancelled),
        }
    }
}

impl<T, E> Outcome<T, E> {
    fn state(&self) -> FutureState {
        match self {
            Outcome::Succeeded(_) => FutureState::Succeeded,
            Outcome::Failed(_) => FutureState::Failed,
            Outcome::Cancelled => FutureState::Cancelled,
        }
    }
}

struct Listener {
    callback: Task,
    executor: Box<dyn Executor>,
}

impl Listener {
    fn dispatch(self) {
        let Listener { callback, executor } = self;
        match panic::catch_unwind(AssertUnwindSafe(|| executor.execute(callback))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "Future listener was rejected by its executor"),
            Err(_) => error!("Uncaught panic in future listener"),
        }
    }
}

#[derive(Default)]
struct Listeners {
    pending: Vec<Listener>,
    drained: bool,
}

struct Shared<T, E> {
    outcome: OnceLock<Outcome<T, E>>,
    latch: Latch,
    /// Wakes async readers; see [`SettableFuture::resolved`].
    resolved: Notify,
    listeners: Mutex<Listeners>,
}

/// A result container written at most once and read any number of times.
///
/// Clones share the same outcome; the producer and every consumer simply hold
/// their own clone.
pub struct SettableFuture<T, E = anyhow::Error> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for SettableFuture<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Default for SettableFuture<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SettableFuture<T, E> {
    /// Create a pending future.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                outcome: OnceLock::new(),
                latch: Latch::new(),
                resolved: Notify::new(),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.shared.listeners.lock()
    }

    fn resolve(&self, outcome: Outcome<T, E>) -> Result<(), AlreadyResolved> {
        if self.shared.outcome.set(outcome).is_err() {
            return Err(AlreadyResolved);
        }

        self.shared.latch.release_all();
        self.shared.resolved.notify_waiters();

        let listeners = {
            let mut listeners = self.listeners();
            listeners.drained = true;
            std::mem::take(&mut listeners.pending)
        };

        for listener in listeners {
            listener.dispatch();
        }

        Ok(())
    }

    /// Resolve with a value.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyResolved` if an outcome was already recorded; the
    /// existing outcome is kept.
    pub fn complete(&self, value: T) -> Result<(), AlreadyResolved> {
        self.resolve(Outcome::Succeeded(value))
    }

    /// Resolve with a failure.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyResolved` if an outcome was already recorded; the
    /// existing outcome is kept.
    pub fn fail(&self, error: E) -> Result<(), AlreadyResolved> {
        self.resolve(Outcome::Failed(Arc::new(error)))
    }

    /// Like [`complete`](Self::complete), reporting a lost race as `false`.
    pub fn try_complete(&self, value: T) -> bool {
        self.complete(value).is_ok()
    }

    /// Like [`fail`](Self::fail), reporting a lost race as `false`.
    pub fn try_fail(&self, error: E) -> bool {
        self.fail(error).is_ok()
    }

    /// Cancel the future if it is still pending.
    ///
    /// Returns whether this call won the race. Cancellation is bookkeeping
    /// only: work already running is not stopped, and its eventual result is
    /// discarded. Blocked readers wake up with `FutureError::Cancelled` and
    /// listeners fire as for any other resolution.
    pub fn cancel(&self) -> bool {
        self.resolve(Outcome::Cancelled).is_ok()
    }

    pub fn state(&self) -> FutureState {
        self.shared
            .outcome
            .get()
            .map_or(FutureState::Pending, Outcome::state)
    }

    /// Whether an outcome (of any kind) has been recorded.
    pub fn is_done(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == FutureState::Cancelled
    }

    /// Register `callback` to run on `executor` once the future resolves.
    ///
    /// Every listener runs exactly once. Listeners present at resolution run
    /// in registration order on the resolving thread's dispatch loop; a
    /// listener added after resolution is dispatched immediately from the
    /// calling thread. A panicking or rejected listener is logged and does
    /// not affect other listeners or the outcome.
    pub fn add_listener<F, X>(&self, callback: F, executor: X)
    where
        F: FnOnce() + Send + 'static,
        X: Executor + 'static,
    {
        let listener = Listener {
            callback: Box::new(callback),
            executor: Box::new(executor),
        };

        let mut listeners = self.listeners();
        if listeners.drained {
            drop(listeners);
            listener.dispatch();
        } else {
            listeners.pending.push(listener);
        }
    }

    /// Resolve this future with the outcome of `work`, run on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyResolved` if the future was resolved meanwhile.
    pub fn run<F>(&self, work: F) -> Result<(), AlreadyResolved>
    where
        F: FnOnce() -> Result<T, E>,
    {
        match work() {
            Ok(value) => self.complete(value),
            Err(error) => self.fail(error),
        }
    }
}

impl<T, E> SettableFuture<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Resolve this future with the outcome of `work`, run on `executor`.
    ///
    /// If the future was resolved before the work finishes (typically by
    /// [`cancel`](Self::cancel)), the work's outcome is discarded.
    ///
    /// # Errors
    ///
    /// Returns the executor's error if it refuses the work.
    pub fn run_on<F, X>(&self, work: F, executor: &X) -> crate::error::Result<()>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        X: Executor + ?Sized,
    {
        let future = self.clone();
        executor.execute(Box::new(move || {
            if future.run(work).is_err() {
                debug!("Discarding outcome of work whose future was already resolved");
            }
        }))
    }
}

impl<T: Clone, E> SettableFuture<T, E> {
    /// The outcome, if already resolved; never blocks.
    pub fn try_get(&self) -> Option<Result<T, FutureError<E>>> {
        self.shared.outcome.get().map(Outcome::to_result)
    }

    /// Block until resolved, then return the value.
    ///
    /// # Errors
    ///
    /// - `ExecutionFailed` with the stored failure
    /// - `Cancelled` if the future was cancelled
    /// - `Interrupted` if the calling thread is interrupted while waiting
    pub fn get(&self) -> Result<T, FutureError<E>> {
        loop {
            if let Some(outcome) = self.shared.outcome.get() {
                return outcome.to_result();
            }
            self.shared.latch.wait()?;
        }
    }

    /// Block for at most `timeout`, then return the value.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus `Timeout` if the future is still pending
    /// when the budget runs out. A resolution landing exactly at the deadline
    /// is reported rather than the timeout.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, FutureError<E>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.get();
        };

        loop {
            if let Some(outcome) = self.shared.outcome.get() {
                return outcome.to_result();
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.shared.latch.wait_timeout(remaining) {
                Ok(()) => continue,
                Err(WaitError::Timeout(_)) => {
                    return match self.shared.outcome.get() {
                        Some(outcome) => outcome.to_result(),
                        None => Err(FutureError::Timeout(timeout)),
                    };
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl<T, E> SettableFuture<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Wait for resolution without blocking a thread.
    ///
    /// ```
    /// use core_concurrent::SettableFuture;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let future: SettableFuture<&'static str> = SettableFuture::new();
    /// let producer = future.clone();
    /// tokio::spawn(async move { producer.complete("done").unwrap() });
    ///
    /// assert_eq!(future.resolved().await.unwrap(), "done");
    /// # });
    /// ```
    ///
    /// Dropping the returned future before it completes (under `select!` or
    /// `tokio::time::timeout`) leaves nothing registered on this future.
    pub async fn resolved(&self) -> Result<T, FutureError<E>> {
        let notified = self.shared.resolved.notified();
        tokio::pin!(notified);
        // Registered before the check: a resolution after it still wakes us.
        notified.as_mut().enable();

        if !self.is_done() {
            notified.await;
        }

        self.get()
    }
}

impl<T, E> std::fmt::Debug for SettableFuture<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettableFuture")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use crate::executor::DirectExecutor;
    use crate::interrupt;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::thread;

    mock! {
        Executor {}

        impl Executor for Executor {
            fn execute(&self, task: Task) -> std::result::Result<(), PoolError>;
        }
    }

    type TestFuture = SettableFuture<i32, String>;

    fn rejecting_executor() -> MockExecutor {
        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .returning(|_| Err(PoolError::ShutDown));
        executor
    }

    #[test]
    fn test_complete_then_get() {
        let future = TestFuture::new();
        assert_eq!(future.state(), FutureState::Pending);
        assert!(future.try_get().is_none());

        future.complete(7).unwrap();
        assert!(future.is_done());
        assert!(!future.is_cancelled());
        assert_eq!(future.state(), FutureState::Succeeded);
        assert_eq!(future.get().unwrap(), 7);
        assert_eq!(future.get().unwrap(), 7);
        assert_eq!(future.get_timeout(Duration::ZERO).unwrap(), 7);
    }

    #[test]
    fn test_second_resolution_is_rejected() {
        let future = TestFuture::new();
        future.complete(1).unwrap();

        assert_eq!(future.complete(2), Err(AlreadyResolved));
        assert_eq!(future.fail("late".to_string()), Err(AlreadyResolved));
        assert!(!future.cancel());
        assert_eq!(future.get().unwrap(), 1);
    }

    #[test]
    fn test_failure_is_wrapped() {
        let future = TestFuture::new();
        future.fail("boom".to_string()).unwrap();

        let err = future.get().unwrap_err();
        assert!(matches!(err, FutureError::ExecutionFailed(_)));
        assert_eq!(err.cause().map(String::as_str), Some("boom"));
        assert_eq!(err.to_string(), "execution failed: boom");
        assert_eq!(future.state(), FutureState::Failed);
    }

    #[test]
    fn test_cancel_wins_over_late_completion() {
        let future = TestFuture::new();
        assert!(future.cancel());
        assert!(!future.cancel());
        assert!(future.is_cancelled());
        assert!(future.is_done());

        assert!(!future.try_complete(5));
        assert!(matches!(future.get(), Err(FutureError::Cancelled)));
    }

    #[test]
    fn test_get_timeout_on_pending_future() {
        let future = TestFuture::new();
        let start = Instant::now();
        let err = future.get_timeout(Duration::from_millis(50)).unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn test_get_timeout_sees_resolution_within_budget() {
        let future = TestFuture::new();
        let producer = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.complete(3).unwrap();
        });

        assert_eq!(future.get_timeout(Duration::from_secs(5)).unwrap(), 3);
        handle.join().unwrap();
    }

    #[test]
    fn test_blocked_readers_all_see_the_same_value() {
        let future = TestFuture::new();
        let barrier = Arc::new(Barrier::new(9));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let future = future.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    future.get()
                })
            })
            .collect();

        barrier.wait();
        thread::sleep(Duration::from_millis(20));
        future.complete(99).unwrap();

        for reader in readers {
            assert_eq!(reader.join().unwrap().unwrap(), 99);
        }
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let future = TestFuture::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = Arc::clone(&order);
            future.add_listener(move || order.lock().push(id), DirectExecutor);
        }
        assert!(order.lock().is_empty());

        future.complete(0).unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_late_listener_fires_immediately() {
        let future = TestFuture::new();
        future.fail("done".to_string()).unwrap();

        let (tx, rx) = mpsc::channel();
        future.add_listener(move || tx.send(()).unwrap(), DirectExecutor);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_cancel_fires_listeners() {
        let future = TestFuture::new();
        let (tx, rx) = mpsc::channel();
        future.add_listener(move || tx.send(()).unwrap(), DirectExecutor);

        assert!(future.cancel());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let future = TestFuture::new();
        let calls = Arc::new(AtomicUsize::new(0));

        future.add_listener(|| panic!("listener failure"), DirectExecutor);
        let c = Arc::clone(&calls);
        future.add_listener(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
            DirectExecutor,
        );

        future.complete(11).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(future.get().unwrap(), 11);
    }

    #[test]
    fn test_rejected_listener_does_not_disturb_resolution() {
        let future = TestFuture::new();
        future.add_listener(|| panic!("must not run"), rejecting_executor());
        future.complete(4).unwrap();
        assert_eq!(future.get().unwrap(), 4);
    }

    #[test]
    fn test_listener_goes_through_its_executor_once() {
        let future = TestFuture::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let mut executor = MockExecutor::new();
        executor.expect_execute().times(1).returning(|task| {
            task();
            Ok(())
        });

        let counter = Arc::clone(&fired);
        future.add_listener(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            executor,
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        future.complete(1).unwrap();
        assert!(future.complete(2).is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_executor_unused_when_never_resolved() {
        let future = TestFuture::new();
        let mut executor = MockExecutor::new();
        executor.expect_execute().never();

        future.add_listener(|| {}, executor);
        drop(future);
    }

    #[test]
    fn test_concurrent_registration_fires_each_listener_once() {
        for _ in 0..50 {
            let future = TestFuture::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(5));

            let registrants: Vec<_> = (0..4)
                .map(|_| {
                    let future = future.clone();
                    let calls = Arc::clone(&calls);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        for _ in 0..25 {
                            let calls = Arc::clone(&calls);
                            future.add_listener(
                                move || {
                                    calls.fetch_add(1, Ordering::SeqCst);
                                },
                                DirectExecutor,
                            );
                        }
                    })
                })
                .collect();

            barrier.wait();
            future.complete(1).unwrap();

            for registrant in registrants {
                registrant.join().unwrap();
            }
            assert_eq!(calls.load(Ordering::SeqCst), 100);
        }
    }

    #[test]
    fn test_cancel_and_complete_race_has_one_winner() {
        for _ in 0..100 {
            let future = TestFuture::new();
            let barrier = Arc::new(Barrier::new(2));

            let canceller = {
                let future = future.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    future.cancel()
                })
            };

            barrier.wait();
            let completed = future.try_complete(5);
            let cancelled = canceller.join().unwrap();

            assert!(completed ^ cancelled);
            match future.get() {
                Ok(value) => {
                    assert!(completed);
                    assert_eq!(value, 5);
                }
                Err(FutureError::Cancelled) => assert!(cancelled),
                Err(other) => panic!("unexpected outcome: {other}"),
            }
        }
    }

    #[test]
    fn test_interrupted_get() {
        let future = TestFuture::new();
        let reader_future = future.clone();
        let (tx, rx) = mpsc::channel();

        let reader = thread::spawn(move || {
            tx.send(interrupt::current()).unwrap();
            reader_future.get()
        });

        rx.recv().unwrap().interrupt();
        assert!(matches!(
            reader.join().unwrap(),
            Err(FutureError::Interrupted)
        ));
        assert!(!future.is_done());
    }

    #[test]
    fn test_run_inline() {
        let ok = TestFuture::new();
        ok.run(|| Ok(10)).unwrap();
        assert_eq!(ok.get().unwrap(), 10);

        let failed = TestFuture::new();
        failed.run(|| Err("nope".to_string())).unwrap();
        assert!(matches!(failed.get(), Err(FutureError::ExecutionFailed(_))));

        assert_eq!(failed.run(|| Ok(1)), Err(AlreadyResolved));
    }

    #[test]
    fn test_run_on_executor() {
        let future = TestFuture::new();
        future.run_on(|| Ok(21 * 2), &DirectExecutor).unwrap();
        assert_eq!(future.get().unwrap(), 42);

        let rejected = TestFuture::new();
        assert!(rejected.run_on(|| Ok(0), &rejecting_executor()).is_err());
        assert!(!rejected.is_done());
    }

    #[tokio::test]
    async fn test_resolved_async() {
        let future = TestFuture::new();
        let producer = future.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.complete(8).unwrap();
        });

        assert_eq!(future.resolved().await.unwrap(), 8);
        assert_eq!(future.resolved().await.unwrap(), 8);
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_async_waits_leave_nothing_behind() {
        let future = TestFuture::new();

        for _ in 0..1000 {
            tokio::select! {
                biased;
                _ = future.resolved() => panic!("still pending"),
                _ = std::future::ready(()) => {}
            }
        }
        assert!(future.listeners().pending.is_empty());

        let producer = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.complete(3).unwrap();
        });
        assert_eq!(future.resolved().await.unwrap(), 3);
        handle.join().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_wait_racing_resolution() {
        for n in 0..200 {
            let future = TestFuture::new();
            let producer = future.clone();
            let handle = thread::spawn(move || producer.complete(n).unwrap());

            let value = tokio::time::timeout(Duration::from_secs(5), future.resolved())
                .await
                .expect("resolution observed")
                .unwrap();
            assert_eq!(value, n);
            handle.join().unwrap();
        }
    }
}
