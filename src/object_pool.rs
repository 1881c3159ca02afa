use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Types that can be scrubbed before going back into an [`ObjectPool`].
pub trait Recycle {
    /// Drops any state left by the previous user.
    fn recycle(&mut self);
}

/// A thread-safe object pool for reusing allocations.
///
/// This pool uses a simple mutex-protected deque for storing objects.
/// Objects are lazily created when the pool is empty, and recycled when
/// returned so the next user never observes the previous one's state.
pub struct ObjectPool<T> {
    pool: Arc<Mutex<VecDeque<T>>>,
    create_fn: Arc<dyn Fn() -> T + Send + Sync>,
    capacity: usize,
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            create_fn: Arc::clone(&self.create_fn),
            capacity: self.capacity,
        }
    }
}

impl<T: Recycle + Send + 'static> ObjectPool<T> {
    /// Creates a pool pre-filled with `initial_size` objects built by
    /// `create_fn`, retaining at most `capacity` idle objects.
    pub fn new<F>(initial_size: usize, capacity: usize, create_fn: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let capacity = capacity.max(initial_size);
        let mut pool = VecDeque::with_capacity(initial_size);

        for _ in 0..initial_size {
            pool.push_back(create_fn());
        }

        Self {
            pool: Arc::new(Mutex::new(pool)),
            create_fn: Arc::new(create_fn),
            capacity,
        }
    }

    /// Acquires an object from the pool, creating a new one if the pool is empty.
    #[inline]
    pub fn acquire(&self) -> PooledObject<T> {
        let object = self.pool.lock().pop_front();
        let object = object.unwrap_or_else(|| (self.create_fn)());

        PooledObject {
            object: Some(object),
            pool: Arc::clone(&self.pool),
            capacity: self.capacity,
        }
    }

    /// Returns the number of idle objects currently in the pool.
    pub fn available(&self) -> usize {
        self.pool.lock().len()
    }
}

/// A guard that returns the object to the pool when dropped.
pub struct PooledObject<T: Recycle> {
    object: Option<T>,
    pool: Arc<Mutex<VecDeque<T>>>,
    capacity: usize,
}

impl<T: Recycle> std::ops::Deref for PooledObject<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        match self.object.as_ref() {
            Some(object) => object,
            None => unreachable!("pooled object is only vacated on drop"),
        }
    }
}

impl<T: Recycle> std::ops::DerefMut for PooledObject<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.object.as_mut() {
            Some(object) => object,
            None => unreachable!("pooled object is only vacated on drop"),
        }
    }
}

impl<T: Recycle> Drop for PooledObject<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(mut object) = self.object.take() {
            object.recycle();
            let mut pool = self.pool.lock();
            // Only return to pool if under capacity
            if pool.len() < self.capacity {
                pool.push_back(object);
            }
        }
    }
}
