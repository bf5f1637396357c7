//! Free-list pool of fixed-size byte buffers backing the bidirectional splice
//! (spec.md §5 "Buffer pool: free-list; `Get` returns a slice large enough for the
//! configured read buffer; `Put` returns it").

use parking_lot::Mutex;
use std::sync::Arc;

pub struct BufferPool {
    buffer_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize) -> Arc<Self> {
        Arc::new(Self { buffer_size, free: Mutex::new(Vec::new()) })
    }

    /// Returns a zero-filled buffer of the configured size, reusing a freed one when
    /// available.
    pub fn get(&self) -> Vec<u8> {
        match self.free.lock().pop() {
            Some(mut buf) => {
                buf.resize(self.buffer_size, 0);
                buf
            }
            None => vec![0u8; self.buffer_size],
        }
    }

    pub fn put(&self, buf: Vec<u8>) {
        self.free.lock().push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_buffer_of_configured_size() {
        let pool = BufferPool::new(64 * 1024);
        let buf = pool.get();
        assert_eq!(buf.len(), 64 * 1024);
    }

    #[test]
    fn put_then_get_reuses_the_buffer() {
        let pool = BufferPool::new(1024);
        let buf = pool.get();
        pool.put(buf);
        assert_eq!(pool.free.lock().len(), 1);
        let reused = pool.get();
        assert_eq!(reused.len(), 1024);
        assert_eq!(pool.free.lock().len(), 0);
    }
}
