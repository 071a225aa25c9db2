//! Generic object pool: shared contracts (spec component C4) plus the two
//! concrete pool shapes built on top of them.
//!
//! - [`single`]: at-most-one-object pool (C5).
//! - [`common`]: N-slot pool with a primary/secondary distinction (C6).

pub mod common;
pub mod single;

use std::time::Duration;

use crate::error::Result;

pub use common::CommonObjectPool;
pub use single::SingleObjectPool;

/// Capability implemented by anything an [`ObjectFactory`] produces.
///
/// Invariant (enforced by the owning pool, not by this trait): at most one
/// object with `is_primary() == true` exists per pool at any instant.
pub trait PooledObject {
    /// An opaque, stable identifier useful for logging/debugging.
    fn tag(&self) -> &str;

    /// Whether this object is the pool's single writer/primary handle.
    fn is_primary(&self) -> bool;

    /// Idempotent hint that the object may release any memory it is
    /// willing to give up without losing correctness (e.g. SQLite's
    /// `sqlite3_db_release_memory`).
    fn release_memory(&self);
}

/// Capability that produces and destroys pooled objects.
///
/// `make_primary`/`make_object` may fail with a factory-level error, which
/// the pool never retries or recovers from — it surfaces the error without
/// counting the attempt toward the pool's live-object count. `destroy`
/// must not fail under normal operation; implementations should log and
/// suppress failures rather than propagate them. `close` is idempotent and
/// releases factory-wide resources (e.g. an encryption [`crate::key::Key`]).
pub trait ObjectFactory {
    type Object: PooledObject;

    /// Produces the pool's primary (writer) object.
    fn make_primary(&self) -> Result<Self::Object>;

    /// Produces a secondary (reader) object.
    fn make_object(&self) -> Result<Self::Object>;

    /// Destroys `obj`. Errors are logged and suppressed, never propagated.
    fn destroy(&self, obj: Self::Object);

    /// Releases factory-wide resources. Idempotent.
    fn close(&self);
}

impl<F: ObjectFactory> ObjectFactory for std::sync::Arc<F> {
    type Object = F::Object;
    fn make_primary(&self) -> Result<Self::Object> {
        F::make_primary(self)
    }
    fn make_object(&self) -> Result<Self::Object> {
        F::make_object(self)
    }
    fn destroy(&self, obj: Self::Object) {
        F::destroy(self, obj)
    }
    fn close(&self) {
        F::close(self)
    }
}

/// Shared borrow/return/close contract implemented by both pool shapes.
pub trait ObjectPool<F: ObjectFactory> {
    /// Borrows an object for exclusive use, suspending the caller if none
    /// is immediately available. Fails with `Error::Cancelled` once the
    /// pool has been closed.
    fn borrow(&self) -> Result<Borrowed<'_, F>>;

    /// Like [`ObjectPool::borrow`], but `primary_hint` lets the caller ask
    /// for the primary object specifically (e.g. a write transaction).
    /// Ignored by [`SingleObjectPool`]; honoured by [`CommonObjectPool`].
    fn borrow_for(&self, primary_hint: bool) -> Result<Borrowed<'_, F>>;

    /// Non-blocking variant of [`ObjectPool::borrow_for`]: returns `Ok(None)`
    /// immediately rather than suspending if nothing is available within
    /// `timeout`.
    fn try_borrow_for(
        &self,
        primary_hint: bool,
        timeout: Duration,
    ) -> Result<Option<Borrowed<'_, F>>>;

    /// Idempotently closes the pool: new borrows fail with `Cancelled`,
    /// idle objects are destroyed, and in-flight borrowed objects are
    /// destroyed on return rather than recycled.
    fn close(&self);

    /// Runs one eviction pass: objects idle for at least the pool's
    /// configured delay are destroyed, subject to the "never evict the
    /// sole live primary of a non-closed pool" policy. Intended to be
    /// driven by a periodic background task, but safe to call directly.
    fn evict_idle(&self);
}

/// An object currently on loan from a pool. Returning it to the pool (or
/// destroying it, if the pool has been closed) happens when this value is
/// dropped.
pub struct Borrowed<'p, F: ObjectFactory> {
    pub(crate) object: Option<F::Object>,
    pub(crate) return_to: Option<Box<dyn FnOnce(F::Object) + 'p>>,
}

impl<'p, F: ObjectFactory> Borrowed<'p, F> {
    pub(crate) fn new(object: F::Object, return_to: impl FnOnce(F::Object) + 'p) -> Self {
        Self {
            object: Some(object),
            return_to: Some(Box::new(return_to)),
        }
    }
}

impl<F: ObjectFactory> std::ops::Deref for Borrowed<'_, F> {
    type Target = F::Object;
    fn deref(&self) -> &Self::Target {
        self.object.as_ref().expect("object taken before drop")
    }
}

impl<F: ObjectFactory> std::ops::DerefMut for Borrowed<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.object.as_mut().expect("object taken before drop")
    }
}

impl<F: ObjectFactory> Drop for Borrowed<'_, F> {
    fn drop(&mut self) {
        if let (Some(obj), Some(return_to)) = (self.object.take(), self.return_to.take()) {
            return_to(obj);
        }
    }
}

impl<F: ObjectFactory> std::fmt::Debug for Borrowed<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Borrowed").finish_non_exhaustive()
    }
}
