//! Response buffer pairing transmitted commands with their replies.
//!
//! Single producer (the reader thread), single consumer (the application
//! thread holding the command lock). `get` consumes exactly `n` bytes and
//! blocks until that many are available.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::timer::Deadline;
use crate::TIMEOUT_INFINITE;

/// Capacity bound; matches the reception line buffer.
const BUFFER_CAPACITY: usize = 128;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferError {
    /// Fewer than the requested bytes arrived within the timeout (or the
    /// buffer was signalled while waiting).
    #[error("response timed out")]
    Timeout,
}

struct BufferInner {
    bytes: VecDeque<u8>,
    signalled: bool,
}

pub struct ResponseBuffer {
    inner: Mutex<BufferInner>,
    cond: Condvar,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                bytes: VecDeque::with_capacity(BUFFER_CAPACITY),
                signalled: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Appends bytes and wakes a waiting consumer. Bytes beyond the buffer
    /// capacity are dropped.
    pub fn put(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let room = BUFFER_CAPACITY.saturating_sub(inner.bytes.len());
        inner.bytes.extend(bytes.iter().copied().take(room));
        self.cond.notify_one();
    }

    /// Waits until at least `n` bytes are available and consumes exactly
    /// `n`. A timeout of 0 polls; [`TIMEOUT_INFINITE`] waits forever.
    pub fn get(&self, n: usize, timeout: u16) -> Result<Vec<u8>, BufferError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.bytes.len() < n {
            if timeout == 0 {
                return Err(BufferError::Timeout);
            }
            if timeout == TIMEOUT_INFINITE {
                while inner.bytes.len() < n {
                    inner.signalled = false;
                    inner = self.cond.wait(inner).unwrap();
                    if inner.signalled && inner.bytes.len() < n {
                        return Err(BufferError::Timeout);
                    }
                }
            } else {
                let deadline = Deadline::after_millis(timeout);
                while inner.bytes.len() < n {
                    let remaining = deadline.remaining();
                    if remaining.is_zero() {
                        return Err(BufferError::Timeout);
                    }
                    inner.signalled = false;
                    let (guard, result) = self.cond.wait_timeout(inner, remaining).unwrap();
                    inner = guard;
                    if inner.bytes.len() >= n {
                        break;
                    }
                    if inner.signalled || result.timed_out() {
                        return Err(BufferError::Timeout);
                    }
                }
            }
        }
        Ok(inner.bytes.drain(..n).collect())
    }

    /// Discards any pending bytes.
    pub fn clear(&self) {
        self.inner.lock().unwrap().bytes.clear();
    }

    /// Wakes a blocked consumer so it can unwind with a timeout.
    pub fn signal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.signalled = true;
        self.cond.notify_all();
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn get_consumes_exactly_n() {
        let buffer = ResponseBuffer::new();
        buffer.put(b"F00\r");
        assert_eq!(buffer.get(1, 0).unwrap(), b"F");
        assert_eq!(buffer.get(3, 0).unwrap(), b"00\r");
    }

    #[test]
    fn empty_poll_times_out_immediately() {
        let buffer = ResponseBuffer::new();
        let start = Instant::now();
        assert_eq!(buffer.get(1, 0), Err(BufferError::Timeout));
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn partial_bytes_do_not_satisfy_get() {
        let buffer = ResponseBuffer::new();
        buffer.put(b"V");
        assert_eq!(buffer.get(6, 20), Err(BufferError::Timeout));
        // the partial byte is still pending
        assert_eq!(buffer.get(1, 0).unwrap(), b"V");
    }

    #[test]
    fn waiting_get_sees_late_put() {
        let buffer = Arc::new(ResponseBuffer::new());
        let producer = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.put(b"z\r");
        });
        assert_eq!(buffer.get(2, 500).unwrap(), b"z\r");
        handle.join().unwrap();
    }

    #[test]
    fn signal_unblocks_waiter() {
        let buffer = Arc::new(ResponseBuffer::new());
        let waiter = Arc::clone(&buffer);
        let handle = thread::spawn(move || waiter.get(1, TIMEOUT_INFINITE));
        thread::sleep(Duration::from_millis(20));
        buffer.signal();
        assert_eq!(handle.join().unwrap(), Err(BufferError::Timeout));
    }

    #[test]
    fn clear_discards_pending() {
        let buffer = ResponseBuffer::new();
        buffer.put(b"\x07");
        buffer.clear();
        assert_eq!(buffer.get(1, 0), Err(BufferError::Timeout));
    }
}
