//! Unbounded FIFO shared by all workers of a pool.
//!
//! The queue also carries the pool's shutdown flag behind the same mutex, so
//! a worker waiting for work and a worker sleeping through a backoff are
//! both woken by `close()`. Backoff sleepers wait on their own condition
//! variable so that `push` never spends its single wakeup on them.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Thread-safe FIFO with blocking pop and a close signal.
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    closing: Condvar,
}

impl<T> TaskQueue<T> {
    /// Create an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            closing: Condvar::new(),
        }
    }

    /// Append `item` and wake one waiting consumer.
    ///
    /// Returns the item back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(item);
            }
            state.items.push_back(item);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Take the oldest item, blocking while the queue is empty and open.
    ///
    /// Returns `None` once the queue is closed and empty. Items pushed before
    /// `close()` are still handed out.
    pub fn pop_blocking(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Take the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Close the queue and wake every waiter.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let was_open = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        self.available.notify_all();
        self.closing.notify_all();
        was_open
    }

    /// Close the queue and take every queued item in one step.
    ///
    /// No consumer can pop an item between the close and the drain. Returns
    /// `None` if the queue was already closed.
    pub fn close_and_drain(&self) -> Option<Vec<T>> {
        let items = {
            let mut state = self.state.lock();
            if std::mem::replace(&mut state.closed, true) {
                return None;
            }
            state.items.drain(..).collect()
        };
        self.available.notify_all();
        self.closing.notify_all();
        Some(items)
    }

    /// Check if the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Remove and return every queued item.
    pub fn drain(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }

    /// Get the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Check if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Sleep for up to `timeout`, returning early if the queue gets closed.
    ///
    /// Returns `true` if the queue is closed. A `timeout` too large to
    /// express as a deadline waits for the close alone.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while !state.closed {
            match deadline {
                Some(deadline) => {
                    if self.closing.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.closing.wait(&mut state),
            }
        }
        state.closed
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskQueue")
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = TaskQueue::new();
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        let popped: Vec<_> = (0..5).map(|_| queue.pop_blocking().unwrap()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_push_after_close_is_rejected() {
        let queue = TaskQueue::new();
        assert!(queue.close());
        assert!(!queue.close());
        assert_eq!(queue.push(1), Err(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_close_drains_remaining_items_first() {
        let queue = TaskQueue::new();
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        queue.close();

        assert_eq!(queue.pop_blocking(), Some("a"));
        assert_eq!(queue.pop_blocking(), Some("b"));
        assert_eq!(queue.pop_blocking(), None);
    }

    #[test]
    fn test_close_wakes_blocked_consumers() {
        let queue = Arc::new(TaskQueue::<u32>::new());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop_blocking())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        queue.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn test_push_wakes_blocked_consumer() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_blocking())
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(42).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_each_item_delivered_once() {
        let queue = Arc::new(TaskQueue::new());
        for i in 0..1000 {
            queue.push(i).unwrap();
        }
        queue.close();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(item) = queue.pop_blocking() {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<i32> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_drain_and_len() {
        let queue = TaskQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.drain(), vec![2]);
        assert!(queue.is_empty());
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_close_and_drain() {
        let queue = TaskQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        assert_eq!(queue.close_and_drain(), Some(vec![1, 2]));
        assert!(queue.is_closed());
        assert_eq!(queue.pop_blocking(), None);
        assert_eq!(queue.close_and_drain(), None);
    }

    #[test]
    fn test_wait_closed_times_out() {
        let queue = TaskQueue::<u32>::new();
        let start = Instant::now();
        assert!(!queue.wait_closed(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_closed_returns_early_on_close() {
        let queue = Arc::new(TaskQueue::<u32>::new());
        let sleeper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let start = Instant::now();
                let closed = queue.wait_closed(Duration::from_secs(30));
                (closed, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();

        let (closed, elapsed) = sleeper.join().unwrap();
        assert!(closed);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_closed_with_unrepresentable_timeout() {
        let queue = Arc::new(TaskQueue::<u32>::new());
        let sleeper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_closed(Duration::MAX))
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!sleeper.is_finished());
        queue.close();
        assert!(sleeper.join().unwrap());

        assert!(queue.wait_closed(Duration::MAX));
    }
}
