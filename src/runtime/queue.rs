//! Blocking message queue for producer/consumer hand-off.
//!
//! Unbounded: producers never block, consumers block until a message
//! arrives. Each decode task owns one of these for inbound audio chunks and
//! one for outbound results.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Unbounded blocking FIFO queue.
pub struct MessageQueue<T> {
    queue: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Enqueue a message. Never blocks.
    pub fn push(&self, msg: T) {
        let mut queue = self.queue.lock();
        queue.push_back(msg);
        drop(queue);
        self.available.notify_one();
    }

    /// Dequeue the oldest message, blocking until one is available.
    pub fn pop(&self) -> T {
        let mut queue = self.queue.lock();
        while queue.is_empty() {
            self.available.wait(&mut queue);
        }
        queue.pop_front().expect("woken with a non-empty queue")
    }

    /// Dequeue without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let queue = MessageQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.pop(), 1);
        assert_eq!(queue.pop(), 2);
        assert_eq!(queue.pop(), 3);
    }

    #[test]
    fn try_pop_on_empty() {
        let queue: MessageQueue<i32> = MessageQueue::new();
        assert_eq!(queue.try_pop(), None);
        queue.push(7);
        assert_eq!(queue.try_pop(), Some(7));
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(MessageQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.push(42);
            })
        };
        assert_eq!(queue.pop(), 42);
        producer.join().expect("producer thread");
    }

    #[test]
    fn many_producers_one_consumer() {
        let queue = Arc::new(MessageQueue::new());
        let mut producers = Vec::new();
        for i in 0..4 {
            let queue = Arc::clone(&queue);
            producers.push(thread::spawn(move || {
                for j in 0..100 {
                    queue.push(i * 100 + j);
                }
            }));
        }
        let mut seen = Vec::with_capacity(400);
        for _ in 0..400 {
            seen.push(queue.pop());
        }
        for p in producers {
            p.join().expect("producer thread");
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..400).collect::<Vec<_>>());
    }
}
