//! Exclusive access arbitration for a shared bus
//!
//! One [`Arbiter`] guards one transport. Holding an [`ExclusiveSession`] is
//! the only way to reach the guarded resource; dropping the session (or
//! calling [`ExclusiveSession::release`]) closes the exclusive open again.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Interval between attempts of a waiting acquire
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Resource with an exclusive open/close primitive pair
pub trait ExclusiveAccess {
    /// Try once to open exclusively
    fn try_begin(&mut self) -> bool;

    /// Close the exclusive open
    fn end(&mut self);
}

/// Cooperative cancellation for a waiting acquire
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Single-holder mutual exclusion around one resource.
///
/// Acquisition is not reentrant: a thread that already holds a session and
/// asks for another one with a blocking acquire waits forever.
#[derive(Debug)]
pub struct Arbiter<T> {
    resource: Mutex<T>,
    poll_interval: Duration,
}

impl<T: ExclusiveAccess> Arbiter<T> {
    pub fn new(resource: T) -> Self {
        Self {
            resource: Mutex::new(resource),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Change the wait between attempts
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Acquire the session, either waiting without bound or trying once
    pub fn acquire(&self, blocking: bool) -> Option<ExclusiveSession<'_, T>> {
        if blocking {
            Some(self.acquire_blocking())
        } else {
            self.try_acquire()
        }
    }

    /// Wait until the session is free; never gives up
    pub fn acquire_blocking(&self) -> ExclusiveSession<'_, T> {
        loop {
            if let Some(session) = self.try_acquire() {
                return session;
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Wait for the session until `deadline` passes or `cancel` fires.
    ///
    /// With neither bound this behaves like [`Arbiter::acquire_blocking`].
    pub fn acquire_bounded(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Option<ExclusiveSession<'_, T>> {
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                trace!("Exclusive acquire cancelled");
                return None;
            }
            if let Some(session) = self.try_acquire() {
                return Some(session);
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        trace!("Exclusive acquire timed out");
                        return None;
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };
            thread::sleep(wait);
        }
    }

    /// Make exactly one attempt, without sleeping
    pub fn try_acquire(&self) -> Option<ExclusiveSession<'_, T>> {
        let mut guard = match self.resource.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!("Previous session holder panicked; recovering bus state");
                poisoned.into_inner()
            }
        };

        if guard.try_begin() {
            Some(ExclusiveSession {
                guard,
                released: false,
            })
        } else {
            None
        }
    }

    /// Run `f` on the resource outside of any session.
    ///
    /// Waits for a current session holder to finish first.
    pub(crate) fn with_resource<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.resource.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Held exclusive session; released on drop
pub struct ExclusiveSession<'a, T: ExclusiveAccess> {
    guard: MutexGuard<'a, T>,
    released: bool,
}

impl<T: ExclusiveAccess> ExclusiveSession<'_, T> {
    /// Close the exclusive open now
    pub fn release(mut self) {
        self.end();
    }

    fn end(&mut self) {
        if !self.released {
            self.released = true;
            self.guard.end();
        }
    }
}

impl<T: ExclusiveAccess> Deref for ExclusiveSession<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: ExclusiveAccess> DerefMut for ExclusiveSession<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: ExclusiveAccess> Drop for ExclusiveSession<'_, T> {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Stand-in for a port whose open can also be held by another process
    #[derive(Default)]
    struct FakePort {
        external_hold: Arc<AtomicBool>,
        opens: usize,
        closes: Arc<AtomicUsize>,
    }

    impl ExclusiveAccess for FakePort {
        fn try_begin(&mut self) -> bool {
            if self.external_hold.load(Ordering::SeqCst) {
                return false;
            }
            self.opens += 1;
            true
        }

        fn end(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_arbiter(port: FakePort) -> Arbiter<FakePort> {
        Arbiter::new(port).with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_non_blocking_on_held_session_returns_immediately() {
        let arbiter = Arbiter::new(FakePort::default());
        let _held = arbiter.acquire(false).unwrap();

        let started = Instant::now();
        assert!(arbiter.acquire(false).is_none());
        assert!(started.elapsed() < POLL_INTERVAL);
    }

    #[test]
    fn test_blocking_waits_for_release() {
        let arbiter = fast_arbiter(FakePort::default());
        let held = arbiter.acquire(true).unwrap();
        let acquired = AtomicBool::new(false);

        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let session = arbiter.acquire(true);
                acquired.store(true, Ordering::SeqCst);
                session.is_some()
            });

            thread::sleep(Duration::from_millis(60));
            assert!(!acquired.load(Ordering::SeqCst));

            held.release();
            assert!(waiter.join().unwrap());
        });
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_release_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let arbiter = Arbiter::new(FakePort {
            closes: closes.clone(),
            ..Default::default()
        });

        let session = arbiter.acquire(false).unwrap();
        session.release();
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        {
            let _dropped = arbiter.acquire(false).unwrap();
        }
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_external_hold_blocks_acquire() {
        let hold = Arc::new(AtomicBool::new(true));
        let arbiter = fast_arbiter(FakePort {
            external_hold: hold.clone(),
            ..Default::default()
        });

        assert!(arbiter.acquire(false).is_none());

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(30));
                hold.store(false, Ordering::SeqCst);
            });
            let session = arbiter.acquire_blocking();
            assert_eq!(session.opens, 1);
        });
    }

    #[test]
    fn test_deadline_bounds_wait() {
        let arbiter = fast_arbiter(FakePort::default());
        let _held = arbiter.acquire(false).unwrap();

        let started = Instant::now();
        let deadline = started + Duration::from_millis(40);
        assert!(arbiter.acquire_bounded(Some(deadline), None).is_none());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_cancel_stops_wait() {
        let arbiter = fast_arbiter(FakePort::default());
        let held = arbiter.acquire(false).unwrap();
        let cancel = CancelToken::new();

        thread::scope(|s| {
            let waiter = s.spawn(|| arbiter.acquire_bounded(None, Some(&cancel)).is_some());
            thread::sleep(Duration::from_millis(20));
            cancel.cancel();
            assert!(!waiter.join().unwrap());
        });
        drop(held);
    }
}
