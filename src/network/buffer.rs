//! Buffer pool for the capture and rewrite hot path.
//!
//! Every captured datagram and every per-receiver rewrite needs a buffer of
//! up to 64 KiB. The pool pre-allocates and recycles them so steady-state
//! relaying does not touch the allocator.

use std::sync::Arc;

use parking_lot::Mutex;

/// Largest IPv4 datagram the capture socket can deliver.
///
/// The IP total-length field is 16 bits, so no datagram exceeds this and
/// capture never truncates.
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// A reusable buffer, returned to its pool on drop.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl PooledBuffer {
    /// Get a mutable slice of the buffer.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Get an immutable slice of the buffer.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Resize the buffer (within [`MAX_DATAGRAM_SIZE`]).
    #[inline]
    pub fn resize(&mut self, len: usize) {
        debug_assert!(len <= MAX_DATAGRAM_SIZE);
        self.data.resize(len, 0);
    }

    /// Get the length of the data in the buffer.
    #[inline]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buffer = std::mem::take(&mut self.data);
        buffer.clear();
        self.pool.lock().push(buffer);
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for PooledBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// A shared pool of datagram-sized buffers.
///
/// Cloning is cheap and clones share the same free list, so the capture loop
/// and the rewrite path draw from one pool.
#[derive(Clone)]
pub struct BufferPool {
    buffers: Arc<Mutex<Vec<Vec<u8>>>>,
    initial_capacity: usize,
}

impl BufferPool {
    /// Create a new buffer pool with the specified number of pre-allocated buffers.
    pub fn new(pool_size: usize) -> Self {
        let buffers: Vec<Vec<u8>> = (0..pool_size)
            .map(|_| Vec::with_capacity(MAX_DATAGRAM_SIZE))
            .collect();

        Self {
            buffers: Arc::new(Mutex::new(buffers)),
            initial_capacity: pool_size,
        }
    }

    /// Get a buffer from the pool, allocating a fresh one if the pool is empty.
    ///
    /// The returned [`PooledBuffer`] goes back to the pool when dropped.
    pub fn get(&self) -> PooledBuffer {
        let data = self
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(MAX_DATAGRAM_SIZE));

        PooledBuffer {
            data,
            pool: Arc::clone(&self.buffers),
        }
    }

    /// Get a buffer pre-filled with zeros of the specified length.
    pub fn get_zeroed(&self, len: usize) -> PooledBuffer {
        let mut buffer = self.get();
        buffer.data.resize(len, 0);
        buffer
    }

    /// Returns the current number of available buffers in the pool.
    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Returns the initial pool capacity.
    pub const fn capacity(&self) -> usize {
        self.initial_capacity
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_get_and_return_buffers_to_pool() {
        let pool = BufferPool::new(4);
        assert_eq!(pool.available(), 4);

        let buf1 = pool.get();
        assert_eq!(pool.available(), 3);

        let buf2 = pool.get();
        assert_eq!(pool.available(), 2);

        drop(buf1);
        assert_eq!(pool.available(), 3);

        drop(buf2);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn should_allocate_new_buffer_when_pool_exhausted() {
        let pool = BufferPool::new(2);

        let _buf1 = pool.get();
        let _buf2 = pool.get();
        assert_eq!(pool.available(), 0);

        // Still works, the extra buffer joins the pool on drop.
        let buf3 = pool.get();
        assert_eq!(pool.available(), 0);
        drop(buf3);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn should_return_zeroed_buffer_of_specified_length() {
        let pool = BufferPool::new(1);
        let buf = pool.get_zeroed(MAX_DATAGRAM_SIZE);

        assert_eq!(buf.len(), MAX_DATAGRAM_SIZE);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn should_not_retain_stale_contents_across_reuse() {
        let pool = BufferPool::new(1);

        let mut buf = pool.get_zeroed(16);
        buf.as_mut_slice().fill(0xAB);
        drop(buf);

        let reused = pool.get_zeroed(16);
        assert!(reused.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn should_share_underlying_pool_when_cloned() {
        let pool1 = BufferPool::new(4);
        let pool2 = pool1.clone();

        let _buf = pool1.get();
        assert_eq!(pool2.available(), 3);
    }
}
