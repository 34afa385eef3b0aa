//! A process-wide free list for reusable objects.
//!
//! The pool hands out items through two ownership handles:
//!
//! - [`Pooled<T>`]: exactly one owner, mutable. Dropping it recycles the
//!   item and returns it to the free list.
//! - [`Shared<T>`]: reference counted, read-only. Cloning it
//!   ([`Shared::mark_used`]) bumps the use count; dropping or
//!   [`releasing`](Shared::release) the last handle returns the item.
//!
//! Because both handles are moved on release, "release more often than
//! mark as used" cannot be expressed at all, and an item that sits in the
//! free list is unreachable from user code.
//!
//! ```text
//!            acquire()                 share()
//!  [free] ────────────→ Pooled<T> ──────────────→ Shared<T> ×N
//!     ↑                     │                          │
//!     └──── recycle() ──────┴──── last handle drops ───┘
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Something that can be reset and handed out again by a [`Pool`].
pub trait Recycle: Send + Sync + 'static {
    /// Clears the item before it goes back onto the free list.
    ///
    /// Implementations should also release oversized allocations so a
    /// single large packet does not pin memory forever.
    fn recycle(&mut self);
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Items sitting in the free list.
    pub idle: usize,
    /// Items currently owned by a [`Pooled`] or [`Shared`] handle.
    pub in_use: usize,
    /// Items ever constructed by this pool.
    pub created: usize,
}

struct PoolInner<T> {
    label: &'static str,
    free: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    created: AtomicUsize,
    in_use: AtomicUsize,
}

impl<T: Recycle> PoolInner<T> {
    fn give_back(&self, mut item: T) {
        item.recycle();
        // Push before decrementing so a concurrent stats() never sees the
        // item in neither state.
        self.free.lock().push(item);
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        trace!(pool = self.label, "item returned to pool");
    }
}

/// A shareable handle to a free list of `T`.
///
/// Cloning a `Pool` is cheap and yields another handle to the same free
/// list, so one pool can be threaded through every connection that needs
/// it instead of living in a global.
pub struct Pool<T: Recycle> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Recycle> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Recycle> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("label", &self.inner.label)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: Recycle> Pool<T> {
    /// Creates an empty pool. `factory` builds a fresh item whenever the
    /// free list is empty.
    pub fn new(
        label: &'static str,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                label,
                free: Mutex::new(Vec::new()),
                factory: Box::new(factory),
                created: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Takes an item from the free list, or builds one.
    pub fn acquire(&self) -> Pooled<T> {
        let recycled = self.inner.free.lock().pop();
        let item = match recycled {
            Some(item) => {
                trace!(pool = self.inner.label, "reusing pooled item");
                item
            }
            None => {
                self.inner.created.fetch_add(1, Ordering::AcqRel);
                debug!(pool = self.inner.label, "pool empty: creating new item");
                (self.inner.factory)()
            }
        };
        self.inner.in_use.fetch_add(1, Ordering::AcqRel);

        Pooled {
            item: Some(item),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Acquires an item and immediately marks it as shared with a use
    /// count of one.
    pub fn acquire_shared(&self) -> Shared<T> {
        self.acquire().share()
    }

    /// Number of idle items in the free list.
    pub fn idle_count(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Number of items currently handed out.
    pub fn in_use_count(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Number of items this pool ever constructed.
    pub fn created_count(&self) -> usize {
        self.inner.created.load(Ordering::Acquire)
    }

    /// Returns all counters at once.
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle_count();
        PoolStats {
            idle,
            in_use: self.in_use_count(),
            created: self.created_count(),
        }
    }

    /// Returns `true` if both handles refer to the same free list.
    pub fn same_pool(&self, other: &Pool<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ---------------------------------------------------------------------------
// Pooled: unique owner
// ---------------------------------------------------------------------------

/// An item on loan from a [`Pool`], owned by exactly one holder.
///
/// Dropping the handle recycles the item.
pub struct Pooled<T: Recycle> {
    // `None` only between `Drop::drop` taking the item and the handle
    // disappearing.
    item: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Recycle> Pooled<T> {
    /// Converts this unique handle into a shared, read-only one with a
    /// use count of one.
    ///
    /// Once shared, the item can no longer be mutated until every
    /// `Shared` handle is gone. This is how a buffer is frozen before
    /// it is queued for sending.
    pub fn share(self) -> Shared<T> {
        Shared(Arc::new(self))
    }

    fn item(&self) -> &T {
        self.item.as_ref().expect("pooled item is present until drop")
    }

    fn item_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item is present until drop")
    }
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item()
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item_mut()
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.item().fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Shared: counted, read-only owners
// ---------------------------------------------------------------------------

/// A read-only, reference-counted loan from a [`Pool`].
///
/// The use count is the number of live `Shared` handles. The item goes
/// back to the pool when the last one is dropped or released.
pub struct Shared<T: Recycle>(Arc<Pooled<T>>);

impl<T: Recycle> Shared<T> {
    /// Registers another user of the item and returns its handle.
    pub fn mark_used(&self) -> Shared<T> {
        Shared(Arc::clone(&self.0))
    }

    /// Gives up this handle.
    ///
    /// Returns `true` iff this was the last user and the item went back
    /// to the pool.
    pub fn release(self) -> bool {
        match Arc::into_inner(self.0) {
            Some(pooled) => {
                drop(pooled);
                true
            }
            None => false,
        }
    }

    /// Current number of users.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Recovers unique, mutable ownership if this is the only user.
    pub fn try_unique(self) -> Result<Pooled<T>, Shared<T>> {
        Arc::try_unwrap(self.0).map_err(Shared)
    }
}

impl<T: Recycle> Clone for Shared<T> {
    fn clone(&self) -> Self {
        self.mark_used()
    }
}

impl<T: Recycle> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.0.item()
    }
}

impl<T: Recycle> From<Pooled<T>> for Shared<T> {
    fn from(pooled: Pooled<T>) -> Self {
        pooled.share()
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(self.0.item()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Slot {
        value: u32,
        recycled: u32,
    }

    impl Recycle for Slot {
        fn recycle(&mut self) {
            self.value = 0;
            self.recycled += 1;
        }
    }

    fn pool() -> Pool<Slot> {
        Pool::new("slot", Slot::default)
    }

    #[test]
    fn test_acquire_on_empty_pool_creates_item() {
        let pool = pool();
        let item = pool.acquire();
        assert_eq!(item.value, 0);
        assert_eq!(
            pool.stats(),
            PoolStats {
                idle: 0,
                in_use: 1,
                created: 1
            }
        );
    }

    #[test]
    fn test_drop_returns_item_and_recycles_it() {
        let pool = pool();
        let mut item = pool.acquire();
        item.value = 7;
        drop(item);

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.in_use_count(), 0);

        let again = pool.acquire();
        assert_eq!(again.value, 0, "recycle must clear the item");
        assert_eq!(again.recycled, 1);
        assert_eq!(pool.created_count(), 1, "item should be reused");
    }

    #[test]
    fn test_shared_release_only_pools_on_last_user() {
        let pool = pool();
        let first = pool.acquire_shared();
        let second = first.mark_used();
        assert_eq!(first.use_count(), 2);

        assert!(!first.release(), "another user remains");
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(second.use_count(), 1);

        assert!(second.release(), "last user returns the item");
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.in_use_count(), 0);
    }

    #[test]
    fn test_try_unique_recovers_mutability() {
        let pool = pool();
        let shared = pool.acquire_shared();
        let extra = shared.mark_used();

        let shared = shared.try_unique().expect_err("two users");
        drop(extra);

        let mut unique = shared.try_unique().expect("single user");
        unique.value = 3;
        assert_eq!(unique.value, 3);
    }

    #[test]
    fn test_pool_clones_share_free_list() {
        let pool = pool();
        let other = pool.clone();
        drop(other.acquire());
        assert!(pool.same_pool(&other));
        assert_eq!(pool.idle_count(), 1);
    }
}
