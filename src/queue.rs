//! Bounded FIFO admission queue between the accept loop and the worker pool

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Capacity-bounded blocking FIFO. `push` blocks while the queue is full,
/// `pop` blocks while it is empty; both are safe for any number of
/// concurrent callers. `close` stops admissions, after which consumers
/// drain the backlog and then see `None`.
///
/// This is the sole synchronization point between the accept loop and the
/// workers: when workers fall behind, the queue fills and the accept loop
/// stalls inside `push`, which stalls `accept()` in turn.
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        BoundedQueue {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Enqueue one item, blocking while the queue is at capacity. Returns
    /// the item back to the caller if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(item);
            }
            if state.items.len() < self.capacity {
                break;
            }
            self.not_full.wait(&mut state);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue one item, blocking while the queue is empty. Returns `None`
    /// once the queue is closed and fully drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Stop admitting new items and wake every blocked producer and
    /// consumer. Items already queued remain poppable.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn preserves_fifo_order() {
        let q = BoundedQueue::new(8);
        for i in 0..5 {
            q.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.pop(), Some(i));
        }
    }

    #[test]
    fn push_blocks_at_capacity_until_a_pop() {
        let q = Arc::new(BoundedQueue::new(2));
        q.push(1).unwrap();
        q.push(2).unwrap();

        let landed = Arc::new(AtomicBool::new(false));
        let producer = {
            let q = Arc::clone(&q);
            let landed = Arc::clone(&landed);
            thread::spawn(move || {
                q.push(3).unwrap();
                landed.store(true, Ordering::SeqCst);
            })
        };

        // The producer must still be parked against the full queue.
        thread::sleep(Duration::from_millis(100));
        assert!(!landed.load(Ordering::SeqCst));
        assert_eq!(q.len(), 2);

        assert_eq!(q.pop(), Some(1));
        producer.join().unwrap();
        assert!(landed.load(Ordering::SeqCst));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn close_rejects_push_and_wakes_blocked_producer() {
        let q = Arc::new(BoundedQueue::new(1));
        q.push(1).unwrap();

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push(2))
        };
        thread::sleep(Duration::from_millis(50));
        q.close();

        assert_eq!(producer.join().unwrap(), Err(2));
        assert_eq!(q.push(3), Err(3));
    }

    #[test]
    fn close_lets_consumers_drain_then_stop() {
        let q = BoundedQueue::new(4);
        q.push("a").unwrap();
        q.push("b").unwrap();
        q.close();
        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("b"));
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn close_wakes_blocked_consumers() {
        let q = Arc::new(BoundedQueue::<u32>::new(1));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(50));
        q.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn each_item_is_consumed_exactly_once() {
        let q = Arc::new(BoundedQueue::new(16));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(item) = q.pop() {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        for i in 0..100u32 {
            q.push(i).unwrap();
        }
        q.close();

        let mut all: Vec<u32> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
