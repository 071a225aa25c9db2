//! N-slot object pool with a primary/secondary distinction (spec component
//! C6). Used for a `DataSource`'s full connection pool: up to
//! `config.primary_budget` live objects may report [`PooledObject::is_primary`],
//! and up to `config.max_size` objects may be live in total.
//!
//! Unlike [`crate::pool::single::SingleObjectPool`], waiting here is a
//! genuine monitor wait over pool-wide state (is anything idle, is there
//! capacity to create more), so this type uses a plain
//! `std::sync::{Mutex, Condvar}` of its own rather than [`crate::mutex::Mutex`],
//! which only arbitrates exclusive access to a single resource.
//!
//! Scheduled eviction is driven by a background thread holding only a
//! `Weak` back-reference to the pool's shared state, the same
//! cycle-breaking shape [`crate::pool::single::SingleObjectPool`] uses: the
//! thread stops itself once the pool is dropped or closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex as StdMutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::{Error, Result};

use super::{Borrowed, ObjectFactory, ObjectPool, PooledObject};

struct Entry<O> {
    object: O,
    idle_since: Instant,
    can_evict: bool,
}

struct State<O> {
    idle: Vec<Entry<O>>,
    live_total: usize,
    live_primary: usize,
    closed: bool,
}

struct Inner<F: ObjectFactory> {
    factory: F,
    config: PoolConfig,
    state: StdMutex<State<F::Object>>,
    cv: Condvar,
    stopped: AtomicBool,
}

impl<F: ObjectFactory> Inner<F> {
    fn lock(&self) -> std::sync::MutexGuard<'_, State<F::Object>> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Takes an object off the idle stack if one is available. A `primary_hint`
    /// of `true` is a preference, not a filter: if a primary happens to be
    /// idle it is returned first, but otherwise any idle object (of whichever
    /// kind) on top of the stack is popped rather than leaving the waiter to
    /// park when capacity to create a fresh object may not exist.
    fn take_idle_matching(state: &mut State<F::Object>, want_primary: bool) -> Option<F::Object> {
        if want_primary
            && let Some(idx) = state.idle.iter().position(|e| e.object.is_primary())
        {
            return Some(state.idle.swap_remove(idx).object);
        }
        if state.idle.is_empty() {
            return None;
        }
        Some(state.idle.pop().expect("checked non-empty above").object)
    }

    fn return_object(&self, obj: F::Object) {
        let mut state = self.lock();
        if state.closed {
            if obj.is_primary() {
                state.live_primary -= 1;
            }
            state.live_total -= 1;
            drop(state);
            self.factory.destroy(obj);
        } else {
            state.idle.push(Entry {
                object: obj,
                idle_since: Instant::now(),
                can_evict: false,
            });
            drop(state);
        }
        // Each return wakes exactly one waiter (spec Fairness note): the
        // waiter that doesn't get it just re-checks and re-parks, so
        // starvation stays bounded without a thundering herd on every return.
        self.cv.notify_one();
    }

    fn evict_idle(&self) {
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        if state.closed {
            return;
        }
        let delay = self.config.eviction_delay;
        let now = Instant::now();
        let mut to_destroy = Vec::new();
        let mut remaining = Vec::with_capacity(state.idle.len());
        for mut entry in state.idle.drain(..) {
            // The sole remaining primary is only ever destroyed on close.
            if entry.object.is_primary() {
                remaining.push(entry);
            } else if entry.can_evict && now.duration_since(entry.idle_since) >= delay {
                to_destroy.push(entry.object);
            } else {
                entry.can_evict = true;
                remaining.push(entry);
            }
        }
        state.live_total -= to_destroy.len();
        state.idle = remaining;
        drop(state);
        for obj in to_destroy {
            self.factory.destroy(obj);
        }
    }
}

/// A pool holding up to `max_size` live objects, at most `primary_budget` of
/// which may be primaries.
pub struct CommonObjectPool<F: ObjectFactory> {
    inner: std::sync::Arc<Inner<F>>,
    eviction_thread: Option<thread::JoinHandle<()>>,
}

impl<F: ObjectFactory + Send + Sync + 'static> CommonObjectPool<F>
where
    F::Object: Send,
{
    /// Builds the pool. Panics if `config` fails [`PoolConfig::validate`].
    /// If `config.eviction_interval` is set, spawns a background thread that
    /// calls [`ObjectPool::evict_idle`] on that cadence until the pool is
    /// closed or dropped.
    #[must_use]
    pub fn new(factory: F, config: PoolConfig) -> Self {
        config.validate().expect("invalid pool configuration");
        let inner = std::sync::Arc::new(Inner {
            factory,
            config,
            state: StdMutex::new(State {
                idle: Vec::new(),
                live_total: 0,
                live_primary: 0,
                closed: false,
            }),
            cv: Condvar::new(),
            stopped: AtomicBool::new(false),
        });

        let eviction_thread = config.eviction_interval.map(|interval| {
            let weak: Weak<Inner<F>> = std::sync::Arc::downgrade(&inner);
            thread::spawn(move || loop {
                thread::sleep(interval);
                match weak.upgrade() {
                    Some(inner) if !inner.stopped.load(Ordering::Acquire) => {
                        inner.evict_idle();
                    }
                    _ => break,
                }
            })
        });

        Self {
            inner,
            eviction_thread,
        }
    }
}

impl<F: ObjectFactory> ObjectPool<F> for CommonObjectPool<F> {
    fn borrow(&self) -> Result<Borrowed<'_, F>> {
        self.borrow_for(false)
    }

    fn borrow_for(&self, primary_hint: bool) -> Result<Borrowed<'_, F>> {
        let inner = &*self.inner;
        let mut state = inner.lock();
        loop {
            if state.closed {
                return Err(Error::Cancelled("pool closed".to_string()));
            }
            if let Some(obj) = Inner::<F>::take_idle_matching(&mut state, primary_hint) {
                drop(state);
                return Ok(Borrowed::new(obj, move |obj| inner.return_object(obj)));
            }
            let can_create = if primary_hint {
                state.live_primary < inner.config.primary_budget && state.live_total < inner.config.max_size
            } else {
                state.live_total < inner.config.max_size
            };
            if can_create {
                let made = if primary_hint {
                    inner.factory.make_primary()
                } else {
                    inner.factory.make_object()
                };
                match made {
                    Ok(obj) => {
                        state.live_total += 1;
                        if primary_hint {
                            state.live_primary += 1;
                        }
                        drop(state);
                        return Ok(Borrowed::new(obj, move |obj| inner.return_object(obj)));
                    }
                    Err(e) => return Err(Error::Factory(Box::new(e))),
                }
            }
            state = inner
                .cv
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    fn try_borrow_for(
        &self,
        primary_hint: bool,
        timeout: Duration,
    ) -> Result<Option<Borrowed<'_, F>>> {
        let inner = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut state = inner.lock();
        loop {
            if state.closed {
                return Err(Error::Cancelled("pool closed".to_string()));
            }
            if let Some(obj) = Inner::<F>::take_idle_matching(&mut state, primary_hint) {
                drop(state);
                return Ok(Some(Borrowed::new(obj, move |obj| inner.return_object(obj))));
            }
            let can_create = if primary_hint {
                state.live_primary < inner.config.primary_budget && state.live_total < inner.config.max_size
            } else {
                state.live_total < inner.config.max_size
            };
            if can_create {
                let made = if primary_hint {
                    inner.factory.make_primary()
                } else {
                    inner.factory.make_object()
                };
                match made {
                    Ok(obj) => {
                        state.live_total += 1;
                        if primary_hint {
                            state.live_primary += 1;
                        }
                        drop(state);
                        return Ok(Some(Borrowed::new(obj, move |obj| inner.return_object(obj))));
                    }
                    Err(e) => return Err(Error::Factory(Box::new(e))),
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (next, timed_out) = inner
                .cv
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = next;
            if timed_out.timed_out() && state.idle.is_empty() {
                return Ok(None);
            }
        }
    }

    fn close(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        drop(state);
        for entry in idle {
            self.inner.factory.destroy(entry.object);
        }
        self.inner.cv.notify_all();
        self.inner.factory.close();
    }

    fn evict_idle(&self) {
        self.inner.evict_idle();
    }
}

impl<F: ObjectFactory> Drop for CommonObjectPool<F> {
    fn drop(&mut self) {
        self.inner.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.eviction_thread.take() {
            // The background thread only holds a `Weak`; once this `Arc`
            // drops it observes `upgrade() == None` and exits on its own,
            // so we don't block the caller joining it here.
            drop(handle);
        }
    }
}
