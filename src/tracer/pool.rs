use std::fmt;
use std::ops::{Deref, DerefMut};

use crossbeam_queue::ArrayQueue;

use super::record::AllocationRecord;

/// Bounded, lock-free pool of reusable objects.
///
/// `acquire` never fails: when no idle object is available a new one is
/// created. `release` resets the object and keeps it if there is room,
/// otherwise drops it.
pub struct ObjectPool<T> {
    /// `None` when pooling is disabled (capacity 0).
    idle: Option<ArrayQueue<T>>,
    create: fn() -> T,
    reset: fn(&mut T),
}

impl<T> ObjectPool<T> {
    pub fn new(capacity: usize, create: fn() -> T, reset: fn(&mut T)) -> Self {
        Self {
            idle: (capacity > 0).then(|| ArrayQueue::new(capacity)),
            create,
            reset,
        }
    }

    pub fn acquire(&self) -> T {
        self.idle
            .as_ref()
            .and_then(ArrayQueue::pop)
            .unwrap_or_else(self.create)
    }

    pub fn release(&self, mut item: T) {
        (self.reset)(&mut item);
        if let Some(idle) = &self.idle {
            // Full pool: the object is simply dropped.
            let _ = idle.push(item);
        }
    }

    /// Hand `item` back to the pool when the returned guard is dropped,
    /// including during unwinding.
    pub fn release_on_drop(&self, item: T) -> Pooled<'_, T> {
        Pooled {
            pool: self,
            item: Some(item),
        }
    }

    /// Idle objects currently held.
    pub fn pooled(&self) -> usize {
        self.idle.as_ref().map_or(0, ArrayQueue::len)
    }

    pub fn capacity(&self) -> usize {
        self.idle.as_ref().map_or(0, ArrayQueue::capacity)
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("pooled", &self.pooled())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Scope guard returned by [`ObjectPool::release_on_drop`].
pub struct Pooled<'p, T> {
    pool: &'p ObjectPool<T>,
    item: Option<T>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only taken in `drop`.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

// ─── Records ─────────────────────────────────────────────────────

pub type RecordPool = ObjectPool<Box<AllocationRecord>>;

/// Pool handing out blank [`AllocationRecord`]s.
pub fn record_pool(capacity: usize) -> RecordPool {
    ObjectPool::new(
        capacity,
        || Box::new(AllocationRecord::blank()),
        |record| record.reset(),
    )
}
