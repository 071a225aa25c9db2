//! At-most-one-object pool (spec component C5).
//!
//! Used for a database's sole primary (write) handle: there is never more
//! than one live object, so the pool degenerates to a lazily-created slot
//! guarded by a single [`Mutex`]. Borrowing *is* locking the slot; the
//! returned [`Borrowed`] carries the lock guard and hands it back on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mutex::{Guard, Mutex};

use super::{Borrowed, ObjectFactory, ObjectPool};

struct Slot<O> {
    object: Option<O>,
    /// Flipped off on every borrow, flipped on by an eviction scan that
    /// found the slot idle; a second scan that still finds it set evicts.
    can_evict: bool,
    closed: bool,
}

struct Inner<F: ObjectFactory> {
    factory: F,
    slot: Mutex<Slot<F::Object>>,
    stopped: AtomicBool,
}

impl<F: ObjectFactory> Inner<F> {
    fn evict_idle(&self) {
        self.slot.with_try_lock(Duration::ZERO, |slot| {
            if slot.closed {
                return;
            }
            if slot.can_evict {
                if let Some(obj) = slot.object.take() {
                    self.factory.destroy(obj);
                }
            } else if slot.object.is_some() {
                slot.can_evict = true;
            }
        });
    }
}

/// A pool that lazy-creates and holds at most one [`ObjectFactory::Object`].
pub struct SingleObjectPool<F: ObjectFactory> {
    inner: Arc<Inner<F>>,
    eviction_thread: Option<thread::JoinHandle<()>>,
}

impl<F: ObjectFactory + Send + Sync + 'static> SingleObjectPool<F>
where
    F::Object: Send,
{
    /// Builds the pool. An object is eligible for eviction once it has been
    /// idle since the previous scan; scans run every `eviction_interval`
    /// when given, driven by a background thread that holds only a weak
    /// reference to the pool's shared state (it stops itself once the pool
    /// is dropped, or immediately once [`SingleObjectPool::close`] runs).
    #[must_use]
    pub fn new(factory: F, eviction_interval: Option<Duration>) -> Self {
        let inner = Arc::new(Inner {
            factory,
            slot: Mutex::new(Slot {
                object: None,
                can_evict: false,
                closed: false,
            }),
            stopped: AtomicBool::new(false),
        });

        let eviction_thread = eviction_interval.map(|interval| {
            let weak: Weak<Inner<F>> = Arc::downgrade(&inner);
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

impl<F: ObjectFactory> SingleObjectPool<F> {
    fn finish_borrow<'s>(
        &'s self,
        mut guard: Guard<'s, Slot<F::Object>>,
    ) -> Result<Borrowed<'s, F>> {
        if guard.closed {
            return Err(Error::Cancelled("pool closed".to_string()));
        }
        if guard.object.is_none() {
            let obj = self.inner.factory.make_primary()?;
            guard.object = Some(obj);
        }
        guard.can_evict = false;
        let obj = guard.object.take().expect("object created above");

        let inner = &self.inner;
        Ok(Borrowed::new(obj, move |returned| {
            if guard.closed {
                inner.factory.destroy(returned);
            } else {
                guard.object = Some(returned);
            }
        }))
    }
}

impl<F: ObjectFactory> ObjectPool<F> for SingleObjectPool<F> {
    fn borrow(&self) -> Result<Borrowed<'_, F>> {
        let guard = self.inner.slot.lock()?;
        self.finish_borrow(guard)
    }

    fn borrow_for(&self, _primary_hint: bool) -> Result<Borrowed<'_, F>> {
        self.borrow()
    }

    fn try_borrow_for(
        &self,
        _primary_hint: bool,
        timeout: Duration,
    ) -> Result<Option<Borrowed<'_, F>>> {
        let guard = match self.inner.slot.try_lock(timeout, true)? {
            Some(guard) => guard,
            None => return Ok(None),
        };
        self.finish_borrow(guard).map(Some)
    }

    fn close(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        match self.inner.slot.lock() {
            Ok(mut guard) => {
                guard.closed = true;
                if let Some(obj) = guard.object.take() {
                    self.inner.factory.destroy(obj);
                }
            }
            Err(_) => return, // already closed by a racing caller
        }
        self.inner.slot.cancel();
        self.inner.factory.close();
    }

    fn evict_idle(&self) {
        self.inner.evict_idle();
    }
}

impl<F: ObjectFactory> Drop for SingleObjectPool<F> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PooledObject;
    use std::sync::atomic::AtomicUsize;

    struct Obj {
        id: usize,
    }

    impl PooledObject for Obj {
        fn tag(&self) -> &str {
            "test"
        }
        fn is_primary(&self) -> bool {
            true
        }
        fn release_memory(&self) {}
    }

    struct CountingFactory {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl ObjectFactory for CountingFactory {
        type Object = Obj;
        fn make_primary(&self) -> Result<Obj> {
            let id = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Obj { id })
        }
        fn make_object(&self) -> Result<Obj> {
            self.make_primary()
        }
        fn destroy(&self, _obj: Obj) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        fn close(&self) {}
    }

    fn factory() -> Arc<CountingFactory> {
        Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        })
    }

    #[test]
    fn lazily_creates_and_reuses_the_object() {
        let f = factory();
        let pool = SingleObjectPool::new(Arc::clone(&f), None);
        assert_eq!(f.created.load(Ordering::SeqCst), 0);
        {
            let b = pool.borrow().unwrap();
            assert_eq!(b.id, 0);
        }
        {
            let b = pool.borrow().unwrap();
            assert_eq!(b.id, 0, "same object reused, not recreated");
        }
        assert_eq!(f.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_borrow_blocks_until_first_is_returned() {
        let f = factory();
        let pool = Arc::new(SingleObjectPool::new(Arc::clone(&f), None));
        let held = pool.borrow().unwrap();
        let p2 = Arc::clone(&pool);
        let handle = thread::spawn(move || {
            let r = p2.try_borrow_for(true, Duration::from_millis(30)).unwrap();
            r.is_none()
        });
        assert!(handle.join().unwrap(), "borrow should have timed out");
        drop(held);
        let next = pool.borrow().unwrap();
        assert_eq!(next.id, 0);
    }

    #[test]
    fn close_destroys_idle_object_and_rejects_new_borrows() {
        let f = factory();
        let pool = SingleObjectPool::new(Arc::clone(&f), None);
        {
            let _b = pool.borrow().unwrap();
        }
        pool.close();
        assert_eq!(f.destroyed.load(Ordering::SeqCst), 1);
        let err = pool.borrow().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn close_while_borrowed_destroys_on_return() {
        let f = factory();
        let pool = Arc::new(SingleObjectPool::new(Arc::clone(&f), None));
        let held = pool.borrow().unwrap();
        let p2 = Arc::clone(&pool);
        let closer = thread::spawn(move || p2.close());
        thread::sleep(Duration::from_millis(20));
        drop(held);
        closer.join().unwrap();
        assert_eq!(f.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eviction_requires_two_idle_scans() {
        let f = factory();
        let pool = SingleObjectPool::new(Arc::clone(&f), None);
        {
            let _b = pool.borrow().unwrap();
        }
        pool.evict_idle();
        assert_eq!(f.destroyed.load(Ordering::SeqCst), 0, "first scan only arms eviction");
        pool.evict_idle();
        assert_eq!(f.destroyed.load(Ordering::SeqCst), 1, "second idle scan evicts");
    }

    #[test]
    fn borrow_between_scans_clears_the_evict_flag() {
        let f = factory();
        let pool = SingleObjectPool::new(Arc::clone(&f), None);
        {
            let _b = pool.borrow().unwrap();
        }
        pool.evict_idle();
        {
            let _b = pool.borrow().unwrap();
        }
        pool.evict_idle();
        assert_eq!(f.destroyed.load(Ordering::SeqCst), 0, "borrow reset eligibility");
    }
}
