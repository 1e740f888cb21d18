use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on any single blocking push/pop before it gives up.
const BLOCKING_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    stopping: AtomicBool,
}

/// A thread-safe bounded FIFO coupling two stations.
///
/// Producers block while the buffer is full, consumers while it is empty;
/// both are released promptly by [`BoundedBuffer::stop`] or by an internal
/// 5 s timeout. Cloning yields another handle to the same buffer.
pub struct BoundedBuffer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BoundedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send> BoundedBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "buffer capacity must be at least 1");
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                not_full: Condvar::new(),
                not_empty: Condvar::new(),
                capacity,
                stopping: AtomicBool::new(false),
            }),
        }
    }

    /// Blocking enqueue. `Err` hands the item back when the buffer is
    /// stopped or stayed full for the whole blocking window.
    pub fn push(&self, item: T) -> Result<(), T> {
        self.push_deadline(item, Instant::now() + BLOCKING_TIMEOUT)
    }

    /// Non-blocking enqueue.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        if self.is_stopped() {
            return Err(item);
        }
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.capacity || self.is_stopped() {
            return Err(item);
        }
        queue.push_back(item);
        drop(queue);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Blocking dequeue. `None` when the buffer is stopped or stayed empty
    /// for the whole blocking window.
    pub fn pop(&self) -> Option<T> {
        self.pop_deadline(Instant::now() + BLOCKING_TIMEOUT)
    }

    /// Blocking dequeue with a caller-supplied timeout.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        self.pop_deadline(Instant::now() + timeout)
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> Option<T> {
        if self.is_stopped() {
            return None;
        }
        let mut queue = self.inner.queue.lock();
        let item = queue.pop_front();
        drop(queue);
        if item.is_some() {
            self.inner.not_full.notify_one();
        }
        item
    }

    fn push_deadline(&self, item: T, deadline: Instant) -> Result<(), T> {
        if self.is_stopped() {
            return Err(item);
        }
        let mut queue = self.inner.queue.lock();
        while queue.len() >= self.inner.capacity {
            if self.is_stopped() {
                return Err(item);
            }
            let timed_out = self
                .inner
                .not_full
                .wait_until(&mut queue, deadline)
                .timed_out();
            if timed_out && queue.len() >= self.inner.capacity {
                return Err(item);
            }
        }
        if self.is_stopped() {
            return Err(item);
        }
        queue.push_back(item);
        drop(queue);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    fn pop_deadline(&self, deadline: Instant) -> Option<T> {
        if self.is_stopped() {
            return None;
        }
        let mut queue = self.inner.queue.lock();
        while queue.is_empty() {
            if self.is_stopped() {
                return None;
            }
            let timed_out = self
                .inner
                .not_empty
                .wait_until(&mut queue, deadline)
                .timed_out();
            if timed_out && queue.is_empty() {
                return None;
            }
        }
        if self.is_stopped() {
            return None;
        }
        let item = queue.pop_front();
        drop(queue);
        self.inner.not_full.notify_one();
        item
    }

    /// Current number of resident items. Point-in-time; never outside
    /// `[0, capacity]`.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.queue.lock().len() >= self.inner.capacity
    }

    /// Stop the buffer. All current and future blocking operations return
    /// refused promptly. Idempotent.
    pub fn stop(&self) {
        if !self.inner.stopping.swap(true, Ordering::SeqCst) {
            let _guard = self.inner.queue.lock();
            self.inner.not_full.notify_all();
            self.inner.not_empty.notify_all();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopping.load(Ordering::SeqCst)
    }

    /// Atomically drain the buffer, waking any waiting producer. Dropped
    /// items are not returned.
    pub fn clear(&self) {
        let mut queue = self.inner.queue.lock();
        queue.clear();
        drop(queue);
        self.inner.not_full.notify_all();
    }

    /// Return a stopped buffer to service, empty. Only the controller may
    /// do this, as part of restarting the line.
    pub(crate) fn reopen(&self) {
        let mut queue = self.inner.queue.lock();
        queue.clear();
        self.inner.stopping.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_push_pop_fifo() {
        let buffer = BoundedBuffer::new(10);
        for i in 0..5 {
            buffer.try_push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(buffer.try_pop(), Some(i));
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_try_push_refuses_when_full() {
        let buffer = BoundedBuffer::new(2);
        buffer.try_push(1).unwrap();
        buffer.try_push(2).unwrap();
        assert_eq!(buffer.try_push(3), Err(3));
        assert!(buffer.is_full());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let buffer: BoundedBuffer<u32> = BoundedBuffer::new(4);
        let start = Instant::now();
        assert_eq!(buffer.pop_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_blocked_producer_wakes_on_pop() {
        let buffer = BoundedBuffer::new(1);
        buffer.try_push(1).unwrap();

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.push(2))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(buffer.pop(), Some(1));
        assert!(producer.join().unwrap().is_ok());
        assert_eq!(buffer.pop(), Some(2));
    }

    #[test]
    fn test_stop_wakes_blocked_sides() {
        let full = BoundedBuffer::new(1);
        full.try_push(1).unwrap();
        let producer = {
            let buffer = full.clone();
            thread::spawn(move || buffer.push(2))
        };

        let empty: BoundedBuffer<i32> = BoundedBuffer::new(1);
        let consumer = {
            let buffer = empty.clone();
            thread::spawn(move || buffer.pop())
        };

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        full.stop();
        empty.stop();
        assert_eq!(producer.join().unwrap(), Err(2));
        assert_eq!(consumer.join().unwrap(), None);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_stopped_buffer_refuses_everything() {
        let buffer = BoundedBuffer::new(4);
        buffer.try_push(1).unwrap();
        buffer.stop();
        buffer.stop(); // idempotent
        assert_eq!(buffer.try_push(2), Err(2));
        assert_eq!(buffer.push(3), Err(3));
        assert_eq!(buffer.try_pop(), None);
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_clear_wakes_producer() {
        let buffer = BoundedBuffer::new(2);
        buffer.try_push(1).unwrap();
        buffer.try_push(2).unwrap();

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.push(3))
        };

        thread::sleep(Duration::from_millis(50));
        buffer.clear();
        assert!(producer.join().unwrap().is_ok());
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.try_pop(), Some(3));
    }

    #[test]
    fn test_size_stays_in_bounds_under_contention() {
        let buffer = BoundedBuffer::new(5);
        let mut handles = Vec::new();

        for p in 0..3 {
            let buffer = buffer.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    while buffer.push(p * 1000 + i).is_err() {}
                }
            }));
        }

        let popped = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let mut count = 0;
                while count < 600 {
                    assert!(buffer.len() <= buffer.capacity());
                    if buffer.pop_timeout(Duration::from_millis(100)).is_some() {
                        count += 1;
                    }
                }
                count
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(popped.join().unwrap(), 600);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fifo_order_preserved_per_producer() {
        let buffer = BoundedBuffer::new(3);
        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    while buffer.push(i).is_err() {}
                }
            })
        };

        let mut last = -1;
        for _ in 0..100 {
            let value = loop {
                if let Some(v) = buffer.pop_timeout(Duration::from_millis(200)) {
                    break v;
                }
            };
            assert!(value > last);
            last = value;
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_reopen_after_stop() {
        let buffer = BoundedBuffer::new(2);
        buffer.try_push(1).unwrap();
        buffer.stop();
        buffer.reopen();
        assert!(buffer.is_empty());
        assert!(!buffer.is_stopped());
        buffer.try_push(7).unwrap();
        assert_eq!(buffer.try_pop(), Some(7));
    }
}
