//! A bounded pool of input cursors (spec.md §5).
//!
//! All mutation goes through a single output cursor guarded by the storage's own mutex; reads
//! instead check out one of a fixed number of pre-built input cursors, blocking if none are free.
//! This bounds the number of concurrently open mappings/file descriptors a storage will use for
//! reads, mirroring the teacher's `Acker`/reader-pooling discipline of never growing unboundedly
//! under concurrent load.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

pub const DEFAULT_POOL_SIZE: usize = 128;

/// A fixed-capacity pool of `T`, typically a per-cursor-kind input cursor factory product.
pub struct CursorPool<T> {
    free: ArrayQueue<T>,
    capacity: usize,
    checked_out: Mutex<usize>,
    available: Condvar,
}

impl<T> CursorPool<T> {
    /// Builds a pool pre-populated from `make`, called once per slot up to `capacity`.
    pub fn new(capacity: usize, mut make: impl FnMut() -> T) -> Self {
        let capacity = capacity.max(1);
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            // ArrayQueue::push cannot fail: we never push more than `capacity` items.
            let _ = free.push(make());
        }
        Self {
            free,
            capacity,
            checked_out: Mutex::new(0),
            available: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Checks out one cursor, blocking the calling thread if the pool is fully checked out.
    pub fn checkout(self: &Arc<Self>) -> PooledCursor<T> {
        loop {
            if let Some(item) = self.free.pop() {
                *self.checked_out.lock() += 1;
                return PooledCursor { item: Some(item), pool: Arc::clone(self) };
            }
            let mut guard = self.checked_out.lock();
            if *guard < self.capacity {
                // A slot freed up between the failed pop and taking the lock; retry the pop.
                continue;
            }
            self.available.wait(&mut guard);
        }
    }

    fn checkin(&self, item: T) {
        let _ = self.free.push(item);
        *self.checked_out.lock() -= 1;
        self.available.notify_one();
    }
}

/// A cursor checked out of a [`CursorPool`]; returns it to the pool on drop.
pub struct PooledCursor<T> {
    item: Option<T>,
    pool: Arc<CursorPool<T>>,
}

impl<T> std::ops::Deref for PooledCursor<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.item.as_ref().expect("item taken before drop")
    }
}

impl<T> std::ops::DerefMut for PooledCursor<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("item taken before drop")
    }
}

impl<T> Drop for PooledCursor<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.checkin(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn checkout_reuses_items_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(CursorPool::new(2, {
            let counter = Arc::clone(&counter);
            move || counter.fetch_add(1, Ordering::SeqCst)
        }));
        assert_eq!(pool.capacity(), 2);

        let a = pool.checkout();
        assert!(*a < 2);
        drop(a);

        let b = pool.checkout();
        let c = pool.checkout();
        assert_ne!(*b, *c);
        // never more items were built than the pool's capacity.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn checkout_blocks_until_a_slot_is_checked_in() {
        let pool = Arc::new(CursorPool::new(1, || 0u32));
        let held = pool.checkout();

        let pool2 = Arc::clone(&pool);
        let handle = std::thread::spawn(move || {
            // Blocks until the main thread drops `held` below.
            let _ = pool2.checkout();
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        drop(held);
        handle.join().unwrap();
    }
}
