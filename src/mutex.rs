//! Cancellable mutual-exclusion gate (spec component C1).
//!
//! A reentrancy-free lock optimised for short critical sections, generic
//! over the data it guards, with an explicit terminal `cancel()` used to
//! abandon waiters during pool shutdown without waking them one at a
//! time. The locking/parking bookkeeping is a small `std::sync::Mutex` +
//! `Condvar`; the guarded value itself lives in an `UnsafeCell` next to it,
//! following the same layout `std::sync::Mutex` and `parking_lot::Mutex`
//! use internally — access is only ever granted through a [`Guard`] held
//! by the thread that won the lock.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex as StdMutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Free,
    Held,
    Cancelled,
}

/// Cancellable mutex guarding a value of type `T`. See module docs.
pub struct Mutex<T> {
    data: UnsafeCell<T>,
    state: StdMutex<LockState>,
    cv: Condvar,
}

// SAFETY: `T` is only ever reachable through a `Guard`, which is only ever
// handed out to the single thread that transitioned `state` to `Held`.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

/// RAII guard returned by a successful acquisition. Dropping it is the
/// `unlock()` operation from the spec; it wakes at most one waiter.
pub struct Guard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            data: UnsafeCell::new(value),
            state: StdMutex::new(LockState::Free),
            cv: Condvar::new(),
        }
    }

    /// Acquires the lock, suspending the caller until it is free or the
    /// mutex is cancelled.
    pub fn lock(&self) -> Result<Guard<'_, T>> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            match *state {
                LockState::Free => {
                    *state = LockState::Held;
                    return Ok(Guard { mutex: self });
                }
                LockState::Cancelled => {
                    return Err(Error::Cancelled("mutex cancelled".to_string()));
                }
                LockState::Held => {
                    state = self
                        .cv
                        .wait(state)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
            }
        }
    }

    /// Attempts acquisition within `timeout`. Returns `Ok(Some(guard))` on
    /// success, `Ok(None)` on timeout (or on cancellation when
    /// `interruptible` is false), and `Err(Cancelled)` when the mutex was
    /// cancelled and `interruptible` is true.
    pub fn try_lock(&self, timeout: Duration, interruptible: bool) -> Result<Option<Guard<'_, T>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            match *state {
                LockState::Free => {
                    *state = LockState::Held;
                    return Ok(Some(Guard { mutex: self }));
                }
                LockState::Cancelled => {
                    return if interruptible {
                        Err(Error::Cancelled("mutex cancelled".to_string()))
                    } else {
                        Ok(None)
                    };
                }
                LockState::Held => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    let (next, timed_out) = self
                        .cv
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    state = next;
                    if timed_out.timed_out() && *state == LockState::Held {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Scoped acquisition: runs `f` only if the lock was acquired within
    /// `timeout`, releasing it on every exit path (including panics, via
    /// `Guard`'s `Drop`).
    pub fn with_try_lock<R>(&self, timeout: Duration, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        match self.try_lock(timeout, false) {
            Ok(Some(mut guard)) => Some(f(&mut guard)),
            _ => None,
        }
    }

    /// Terminally cancels the mutex. Returns `true` on the call that won
    /// the transition; idempotent thereafter. Wakes every waiter, each of
    /// which observes `Cancelled`.
    pub fn cancel(&self) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state == LockState::Cancelled {
            return false;
        }
        *state = LockState::Cancelled;
        drop(state);
        self.cv.notify_all();
        true
    }

    /// Idempotent hint used during shutdown to release waiters stuck on a
    /// stale notification; never required for correctness, only liveness.
    pub fn attempt_unpark_waiters(&self) {
        self.cv.notify_all();
    }

    fn unlock(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state == LockState::Held {
            *state = LockState::Free;
        }
        drop(state);
        self.cv.notify_one();
    }
}

impl<T> Deref for Guard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a `Guard` means `state == Held`, which only this
        // thread could have set, and no other `Guard` can coexist.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for Guard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for Guard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T> std::fmt::Debug for Guard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard").finish_non_exhaustive()
    }
}
