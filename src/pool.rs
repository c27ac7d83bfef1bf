use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use ahash::AHashMap;
use parking_lot::Mutex;

/// Reusable buffers for bound where clauses, keyed by store connection.
/// Acquisition and release are the only points that take the lock.
pub struct BufferPool<H> {
    inner: Mutex<AHashMap<String, Vec<H>>>,
}

impl<H: Default> Default for BufferPool<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Default> BufferPool<H> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AHashMap::new()),
        }
    }

    /// Takes an idle buffer for `key`, or builds one with `make`. The buffer
    /// goes back to the pool when the guard drops.
    pub fn acquire(&self, key: &str, make: impl FnOnce() -> H) -> PooledBuffer<'_, H> {
        let idle = self.inner.lock().get_mut(key).and_then(Vec::pop);
        PooledBuffer {
            pool: self,
            key: key.to_string(),
            buffer: idle.unwrap_or_else(make),
        }
    }

    pub fn idle(&self, key: &str) -> usize {
        self.inner.lock().get(key).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    fn release(&self, key: String, buffer: H) {
        self.inner.lock().entry(key).or_default().push(buffer);
    }
}

impl<H> fmt::Debug for BufferPool<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_map()
            .entries(inner.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

pub struct PooledBuffer<'a, H: Default> {
    pool: &'a BufferPool<H>,
    key: String,
    buffer: H,
}

impl<H: Default> Deref for PooledBuffer<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.buffer
    }
}

impl<H: Default> DerefMut for PooledBuffer<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        &mut self.buffer
    }
}

impl<H: Default> Drop for PooledBuffer<'_, H> {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.release(std::mem::take(&mut self.key), buffer);
    }
}
