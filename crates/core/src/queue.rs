use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Multi-producer/multi-consumer FIFO connecting pipeline stages.
///
/// `enqueue` is lock-free and never fails; the queue has no hard capacity
/// because backpressure belongs to the frame pool, which refuses leases when
/// the pipeline is saturated. Consumers block with a timeout so worker loops
/// can re-check their shutdown flag at a steady cadence.
///
/// Ordering is FIFO per producer; no global order is guaranteed between
/// producers (frames carry timestamps for downstream reassembly).
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use vireo_core::prelude::FrameQueue;
///
/// let queue = FrameQueue::new();
/// queue.enqueue(7u32);
/// assert_eq!(queue.try_dequeue(), Some(7));
/// assert_eq!(queue.dequeue_timeout(Duration::from_millis(1)), None);
/// ```
pub struct FrameQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for FrameQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                queue: SegQueue::new(),
                lock: Mutex::new(()),
                cond: Condvar::new(),
            }),
        }
    }

    /// Push an item; never blocks, never fails.
    pub fn enqueue(&self, item: T) {
        self.inner.queue.push(item);
        // Taking the lock orders the push before a sleeper's re-check.
        drop(self.inner.lock.lock());
        self.inner.cond.notify_one();
    }

    /// Pop without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        self.inner.queue.pop()
    }

    /// Pop, blocking up to `timeout`; `None` means the timeout elapsed.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        if let Some(item) = self.inner.queue.pop() {
            return Some(item);
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        loop {
            if let Some(item) = self.inner.queue.pop() {
                return Some(item);
            }
            if self.inner.cond.wait_until(&mut guard, deadline).timed_out() {
                return self.inner.queue.pop();
            }
        }
    }

    /// Number of queued items (approximate under concurrency).
    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }
}

struct QueueInner<T> {
    queue: SegQueue<T>,
    lock: Mutex<()>,
    cond: Condvar,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fifo_per_producer() {
        let queue = FrameQueue::new();
        for i in 0..100 {
            queue.enqueue(i);
        }
        for i in 0..100 {
            assert_eq!(queue.try_dequeue(), Some(i));
        }
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn timed_dequeue_times_out() {
        let queue: FrameQueue<u8> = FrameQueue::new();
        let start = Instant::now();
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn timed_dequeue_wakes_on_enqueue() {
        let queue = FrameQueue::new();
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(10));
        queue.enqueue(99u32);
        assert_eq!(consumer.join().unwrap(), Some(99));
    }

    #[test]
    fn drains_across_consumers() {
        let queue = FrameQueue::new();
        for i in 0..1000u32 {
            queue.enqueue(i);
        }
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                let mut got = Vec::new();
                while let Some(v) = queue.try_dequeue() {
                    got.push(v);
                }
                got
            }));
        }
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }
}
