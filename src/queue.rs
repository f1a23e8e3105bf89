//! Bounded waitable FIFO between the reader thread and application readers.
//!
//! The reader thread is the only producer; enqueueing never blocks. A full
//! queue drops the new element and counts it as lost, which readers can
//! observe through [`MessageQueue::overflow`] until the queue is cleared.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::timer::Deadline;
use crate::TIMEOUT_INFINITE;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    /// No element became available within the timeout (or the queue was
    /// signalled while waiting).
    #[error("no message available")]
    Empty,
    /// The queue is at capacity; the element was dropped.
    #[error("no space in queue")]
    NoSpace,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    overflow: bool,
    lost: u64,
    signalled: bool,
}

pub struct MessageQueue<T> {
    capacity: usize,
    inner: Mutex<QueueInner<T>>,
    cond: Condvar,
}

impl<T> MessageQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                overflow: false,
                lost: 0,
                signalled: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Appends an element at the tail without blocking. A full queue sets
    /// the overflow flag, increments the lost counter and fails with
    /// [`QueueError::NoSpace`].
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.len() >= self.capacity {
            inner.overflow = true;
            inner.lost += 1;
            return Err(QueueError::NoSpace);
        }
        inner.items.push_back(item);
        self.cond.notify_one();
        Ok(())
    }

    /// Removes the head element, waiting up to `timeout` milliseconds for
    /// one to appear. A timeout of 0 polls; [`TIMEOUT_INFINITE`] waits
    /// until an element arrives or the queue is signalled.
    pub fn dequeue(&self, timeout: u16) -> Result<T, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.items.pop_front() {
            return Ok(item);
        }
        if timeout == 0 {
            return Err(QueueError::Empty);
        }
        if timeout == TIMEOUT_INFINITE {
            loop {
                inner.signalled = false;
                inner = self.cond.wait(inner).unwrap();
                if let Some(item) = inner.items.pop_front() {
                    return Ok(item);
                }
                if inner.signalled {
                    return Err(QueueError::Empty);
                }
            }
        }
        let deadline = Deadline::after_millis(timeout);
        loop {
            inner.signalled = false;
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return Err(QueueError::Empty);
            }
            let (guard, result) = self.cond.wait_timeout(inner, remaining).unwrap();
            inner = guard;
            if let Some(item) = inner.items.pop_front() {
                return Ok(item);
            }
            if inner.signalled || result.timed_out() {
                return Err(QueueError::Empty);
            }
        }
    }

    /// Drops all queued elements and resets the overflow state.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.clear();
        inner.overflow = false;
        inner.lost = 0;
    }

    /// Wakes every blocked dequeuer without producing an element; they
    /// return [`QueueError::Empty`].
    pub fn signal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.signalled = true;
        self.cond.notify_all();
    }

    /// Returns the overflow flag and the number of elements lost since the
    /// last [`MessageQueue::clear`].
    pub fn overflow(&self) -> (bool, u64) {
        let inner = self.inner.lock().unwrap();
        (inner.overflow, inner.lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn fifo_order_is_preserved() {
        let queue = MessageQueue::new(4);
        for i in 0..4 {
            queue.enqueue(i).unwrap();
        }
        for i in 0..4 {
            assert_eq!(queue.dequeue(0), Ok(i));
        }
        assert_eq!(queue.dequeue(0), Err(QueueError::Empty));
    }

    #[test]
    fn overflow_counts_dropped_elements() {
        let queue = MessageQueue::new(4);
        for i in 0..5 {
            let _ = queue.enqueue(i);
        }
        assert_eq!(queue.overflow(), (true, 1));
        // the four oldest elements survive in order
        for i in 0..4 {
            assert_eq!(queue.dequeue(0), Ok(i));
        }
        queue.clear();
        assert_eq!(queue.overflow(), (false, 0));
    }

    #[test]
    fn poll_returns_immediately_when_empty() {
        let queue: MessageQueue<u8> = MessageQueue::new(1);
        let start = Instant::now();
        assert_eq!(queue.dequeue(0), Err(QueueError::Empty));
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn timed_dequeue_sees_late_enqueue() {
        let queue = Arc::new(MessageQueue::new(1));
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.enqueue(7u8).unwrap();
        });
        assert_eq!(queue.dequeue(500), Ok(7));
        handle.join().unwrap();
    }

    #[test]
    fn signal_wakes_infinite_wait() {
        let queue: Arc<MessageQueue<u8>> = Arc::new(MessageQueue::new(1));
        let waiter = Arc::clone(&queue);
        let handle = thread::spawn(move || waiter.dequeue(TIMEOUT_INFINITE));
        thread::sleep(Duration::from_millis(20));
        queue.signal();
        assert_eq!(handle.join().unwrap(), Err(QueueError::Empty));
    }
}
