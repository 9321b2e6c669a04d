//! # Frame Queue - Bounded Producer/Consumer Buffer
//!
//! Two of these sit between the buffering thread and its consumers:
//!
//! ```text
//! ┌───────────┐    ┌─────────────┐    ┌──────────────┐
//! │ Buffering │───►│ video queue │───►│ Render       │
//! │ Thread    │    └─────────────┘    │ Thread       │
//! │           │    ┌─────────────┐    └──────────────┘
//! │           │───►│ audio queue │───►  Audio callback
//! └───────────┘    └─────────────┘      (host thread)
//! ```
//!
//! - Strict FIFO, fixed capacity
//! - Capacity is the only backpressure between buffering and playback
//! - Every blocking call has a timeout or a cancel flag

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Capacity used by a playback session unless configured otherwise
pub const DEFAULT_CAPACITY: usize = 2;

/// Bounded FIFO queue with timed and cancellable blocking operations
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,

    capacity: usize,

    /// Signalled when an item arrives
    ready_cond: Condvar,

    /// Signalled when space frees up
    space_cond: Condvar,

    pushed: AtomicU64,
    popped: AtomicU64,
    drained: AtomicU64,
    high_water: AtomicUsize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            ready_cond: Condvar::new(),
            space_cond: Condvar::new(),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    // ========================================================================
    // Producer API (Buffering Thread)
    // ========================================================================

    /// Push without blocking. Hands the item back if the queue is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        self.enqueue(&mut items, item);
        Ok(())
    }

    /// Push, waiting up to `timeout` for space
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();

        while items.len() >= self.capacity {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(item);
            }
            self.space_cond.wait_for(&mut items, remaining);
        }

        self.enqueue(&mut items, item);
        Ok(())
    }

    /// Push, waiting for space until `cancel` is set.
    ///
    /// `cancel` is re-checked at least every `poll`, so a stop request is seen
    /// even if nobody drains the queue. Hands the item back when cancelled.
    pub fn push_cancellable(&self, item: T, cancel: &AtomicBool, poll: Duration) -> Result<(), T> {
        let mut items = self.items.lock();

        while items.len() >= self.capacity {
            if cancel.load(Ordering::SeqCst) {
                return Err(item);
            }
            self.space_cond.wait_for(&mut items, poll);
        }

        if cancel.load(Ordering::SeqCst) {
            return Err(item);
        }

        self.enqueue(&mut items, item);
        Ok(())
    }

    fn enqueue(&self, items: &mut VecDeque<T>, item: T) {
        items.push_back(item);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.high_water.fetch_max(items.len(), Ordering::Relaxed);
        self.ready_cond.notify_one();
    }

    // ========================================================================
    // Consumer API (Render Thread / Audio Callback)
    // ========================================================================

    /// Pop the oldest item, if any
    pub fn pop(&self) -> Option<T> {
        let mut items = self.items.lock();
        self.dequeue(&mut items)
    }

    /// Pop, waiting up to `timeout` for an item to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();

        while items.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            self.ready_cond.wait_for(&mut items, remaining);
        }

        self.dequeue(&mut items)
    }

    fn dequeue(&self, items: &mut VecDeque<T>) -> Option<T> {
        let item = items.pop_front()?;
        self.popped.fetch_add(1, Ordering::Relaxed);
        self.space_cond.notify_one();
        Some(item)
    }

    // ========================================================================
    // Control API
    // ========================================================================

    /// Discard everything buffered and wake every blocked producer
    pub fn drain(&self) -> usize {
        let mut items = self.items.lock();
        let count = items.len();
        items.clear();
        drop(items);

        self.drained.fetch_add(count as u64, Ordering::Relaxed);
        self.space_cond.notify_all();

        tracing::debug!("Queue drained, {} item(s) discarded", count);
        count
    }

    // ========================================================================
    // Status API
    // ========================================================================

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            capacity: self.capacity,
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            high_water: self.high_water.load(Ordering::Relaxed),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub pushed: u64,
    pub popped: u64,
    pub drained: u64,
    /// Deepest the queue has ever been
    pub high_water: usize,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(3);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.push(3).unwrap();

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_capacity_bound() {
        let queue = BoundedQueue::new(DEFAULT_CAPACITY);
        queue.push('a').unwrap();
        queue.push('b').unwrap();
        assert_eq!(queue.push('c'), Err('c'));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.stats().high_water, 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(2);
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), None);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(30));
        assert!(waited < Duration::from_secs(1));
    }

    #[test]
    fn test_push_timeout_when_full() {
        let queue = BoundedQueue::new(1);
        queue.push(1).unwrap();
        assert_eq!(queue.push_timeout(2, Duration::from_millis(20)), Err(2));
    }

    #[test]
    fn test_blocked_push_wakes_on_pop() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(1).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push_timeout(2, Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn test_push_cancellable_returns_item() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(1).unwrap();
        let cancel = Arc::new(AtomicBool::new(false));

        let producer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            thread::spawn(move || queue.push_cancellable(2, &cancel, Duration::from_millis(5)))
        };

        thread::sleep(Duration::from_millis(20));
        cancel.store(true, Ordering::SeqCst);
        assert_eq!(producer.join().unwrap(), Err(2));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_unblocks_producer() {
        let queue = Arc::new(BoundedQueue::new(2));
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        let cancel = AtomicBool::new(false);

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push_cancellable(3, &cancel, Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.drain(), 2);
        assert_eq!(producer.join().unwrap(), Ok(()));

        let stats = queue.stats();
        assert_eq!(stats.drained, 2);
        assert_eq!(stats.depth, 1);
        assert_eq!(stats.pushed, 3);
    }
}
