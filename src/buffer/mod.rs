//! # Bounded Buffer
//!
//! The [`BoundedBuffer`] struct is the thread-safe handoff point between
//! arbitrarily many producer and consumer threads, with backpressure: when the
//! buffer is full, producers block until space becomes available; when it is
//! empty, consumers block until items arrive. Every blocking operation has a
//! timed and a non-blocking variant, and a timed-out wait is an ordinary
//! return value, never a panic or an error escalation.
//!
//! Items can be inserted and removed at either end. FIFO pipelines pair
//! `push_back` with `pop_front`; pipelines that want freshness-first (LIFO)
//! behavior pair `push_back` with `pop_back`. The two pairings should never be
//! mixed within one pipeline.
//!
//! ## Example
//!
//! ```rust
//! use gendist::buffer::BoundedBuffer;
//!
//! let buffer = BoundedBuffer::new(2);
//! buffer.push_back(1);
//! buffer.push_back(2);
//! assert!(buffer.try_push_back(3).is_err()); // full
//! assert_eq!(buffer.pop_front(), 1);
//! ```

pub mod identified;

pub use identified::{BufferId, IdentifiedBuffer};

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::process;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// The capacity used by [`BoundedBuffer::default`]. The buffer grows and
/// shrinks dynamically below this bound; under normal operation the limit is
/// a safeguard against runaway producers, not a working size.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Returned by `try_push_*` when the buffer is at capacity. Carries the
/// rejected item back to the caller.
pub struct Full<T>(pub T);

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("buffer is full")
    }
}

impl<T> Error for Full<T> {}

/// Returned by `push_*_timed` when no space became available within the
/// allowed time. Carries the rejected item back to the caller.
pub struct PushTimedOut<T>(pub T);

impl<T> fmt::Debug for PushTimedOut<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushTimedOut(..)")
    }
}

impl<T> fmt::Display for PushTimedOut<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("timed out waiting for buffer space")
    }
}

impl<T> Error for PushTimedOut<T> {}

/// A capacity-bounded, thread-safe double-ended queue.
///
/// A capacity of `0` means "unbounded": pushes never block and never fail.
/// All waits are implemented with a mutex and two condition variables
/// (`not_empty`, `not_full`) and loop on their predicate, so spurious wakeups
/// are harmless.
///
/// A poisoned lock means a thread panicked inside a critical section and the
/// queue contents can no longer be trusted; the process is terminated rather
/// than limping on with undefined buffer state.
#[derive(Debug)]
pub struct BoundedBuffer<T> {
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

/// Lock/wait results only fail on poisoning, which is unrecoverable here.
fn fatal_poison<G>(res: std::result::Result<G, PoisonError<G>>) -> G {
    res.unwrap_or_else(|_| {
        eprintln!("gendist: buffer lock poisoned, terminating");
        process::abort()
    })
}

impl<T> BoundedBuffer<T> {
    /// Creates a buffer holding at most `capacity` items. A capacity of `0`
    /// creates an unbounded buffer.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Creates an unbounded buffer; pushes never block.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        fatal_poison(self.queue.lock())
    }

    fn has_room(capacity: usize, queue: &VecDeque<T>) -> bool {
        capacity == 0 || queue.len() < capacity
    }

    /// Adds an item to the back of the buffer, blocking while the buffer is
    /// full.
    pub fn push_back(&self, item: T) {
        self.push_blocking(item, Insert::Back);
    }

    /// Adds an item to the front of the buffer, blocking while the buffer is
    /// full.
    pub fn push_front(&self, item: T) {
        self.push_blocking(item, Insert::Front);
    }

    /// Adds an item to the back of the buffer, giving up after `timeout`.
    ///
    /// On timeout the item is handed back inside [`PushTimedOut`], so no work
    /// is lost.
    pub fn push_back_timed(
        &self,
        item: T,
        timeout: Duration,
    ) -> std::result::Result<(), PushTimedOut<T>> {
        self.push_timed(item, timeout, Insert::Back)
    }

    /// Adds an item to the front of the buffer, giving up after `timeout`.
    pub fn push_front_timed(
        &self,
        item: T,
        timeout: Duration,
    ) -> std::result::Result<(), PushTimedOut<T>> {
        self.push_timed(item, timeout, Insert::Front)
    }

    /// Adds an item to the back of the buffer if there is room, without
    /// blocking.
    pub fn try_push_back(&self, item: T) -> std::result::Result<(), Full<T>> {
        self.try_push(item, Insert::Back)
    }

    /// Adds an item to the front of the buffer if there is room, without
    /// blocking.
    pub fn try_push_front(&self, item: T) -> std::result::Result<(), Full<T>> {
        self.try_push(item, Insert::Front)
    }

    /// Removes and returns the front item, blocking while the buffer is
    /// empty.
    pub fn pop_front(&self) -> T {
        self.pop_blocking(Remove::Front)
    }

    /// Removes and returns the back item, blocking while the buffer is empty.
    pub fn pop_back(&self) -> T {
        self.pop_blocking(Remove::Back)
    }

    /// Removes and returns the front item, or `None` if the buffer stayed
    /// empty for the whole `timeout`.
    pub fn pop_front_timed(&self, timeout: Duration) -> Option<T> {
        self.pop_timed(timeout, Remove::Front)
    }

    /// Removes and returns the back item, or `None` if the buffer stayed
    /// empty for the whole `timeout`.
    pub fn pop_back_timed(&self, timeout: Duration) -> Option<T> {
        self.pop_timed(timeout, Remove::Back)
    }

    /// Removes and returns the front item without blocking.
    pub fn try_pop_front(&self) -> Option<T> {
        self.try_pop(Remove::Front)
    }

    /// Removes and returns the back item without blocking.
    pub fn try_pop_back(&self) -> Option<T> {
        self.try_pop(Remove::Back)
    }

    /// The number of items currently buffered.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The configured capacity; `0` means unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether pushes can ever block or be rejected.
    pub fn is_bounded(&self) -> bool {
        self.capacity != 0
    }

    fn push_blocking(&self, item: T, end: Insert) {
        let queue = self.lock();
        let mut queue = fatal_poison(
            self.not_full
                .wait_while(queue, |q| !Self::has_room(self.capacity, q)),
        );
        end.insert(&mut queue, item);
        drop(queue);
        self.not_empty.notify_one();
    }

    fn push_timed(
        &self,
        item: T,
        timeout: Duration,
        end: Insert,
    ) -> std::result::Result<(), PushTimedOut<T>> {
        let queue = self.lock();
        let (mut queue, wait) = fatal_poison(self.not_full.wait_timeout_while(
            queue,
            timeout,
            |q| !Self::has_room(self.capacity, q),
        ));
        if wait.timed_out() {
            return Err(PushTimedOut(item));
        }
        end.insert(&mut queue, item);
        drop(queue);
        self.not_empty.notify_one();
        Ok(())
    }

    fn try_push(&self, item: T, end: Insert) -> std::result::Result<(), Full<T>> {
        let mut queue = self.lock();
        if !Self::has_room(self.capacity, &queue) {
            return Err(Full(item));
        }
        end.insert(&mut queue, item);
        drop(queue);
        self.not_empty.notify_one();
        Ok(())
    }

    fn pop_blocking(&self, end: Remove) -> T {
        let queue = self.lock();
        let mut queue = fatal_poison(self.not_empty.wait_while(queue, |q| q.is_empty()));
        let item = end.remove(&mut queue).expect("woken on non-empty queue");
        drop(queue);
        self.not_full.notify_one();
        item
    }

    fn pop_timed(&self, timeout: Duration, end: Remove) -> Option<T> {
        let queue = self.lock();
        let (mut queue, wait) =
            fatal_poison(self.not_empty.wait_timeout_while(queue, timeout, |q| q.is_empty()));
        if wait.timed_out() {
            return None;
        }
        let item = end.remove(&mut queue)?;
        drop(queue);
        self.not_full.notify_one();
        Some(item)
    }

    fn try_pop(&self, end: Remove) -> Option<T> {
        let mut queue = self.lock();
        let item = end.remove(&mut queue)?;
        drop(queue);
        self.not_full.notify_one();
        Some(item)
    }
}

impl<T> Default for BoundedBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[derive(Clone, Copy)]
enum Insert {
    Front,
    Back,
}

impl Insert {
    fn insert<T>(self, queue: &mut VecDeque<T>, item: T) {
        match self {
            Insert::Front => queue.push_front(item),
            Insert::Back => queue.push_back(item),
        }
    }
}

#[derive(Clone, Copy)]
enum Remove {
    Front,
    Back,
}

impl Remove {
    fn remove<T>(self, queue: &mut VecDeque<T>) -> Option<T> {
        match self {
            Remove::Front => queue.pop_front(),
            Remove::Back => queue.pop_back(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_capacity_is_respected() {
        let buffer = BoundedBuffer::new(4);
        for i in 0..4 {
            buffer.try_push_back(i).unwrap();
        }
        // The (c+1)th push is rejected and the item handed back.
        let Full(rejected) = buffer.try_push_back(99).unwrap_err();
        assert_eq!(rejected, 99);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_unbounded_never_rejects() {
        let buffer = BoundedBuffer::unbounded();
        for i in 0..50_000 {
            assert!(buffer.try_push_back(i).is_ok());
        }
        assert_eq!(buffer.len(), 50_000);
        assert!(!buffer.is_bounded());
    }

    #[test]
    fn test_fifo_order_single_producer_single_consumer() {
        let buffer = Arc::new(BoundedBuffer::new(16));
        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..1000 {
                    buffer.push_back(i);
                }
            })
        };
        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || (0..1000).map(|_| buffer.pop_front()).collect::<Vec<i32>>())
        };
        producer.join().unwrap();
        let popped = consumer.join().unwrap();
        let expected: Vec<i32> = (0..1000).collect();
        assert_eq!(popped, expected);
    }

    #[test]
    fn test_lifo_pairing() {
        let buffer = BoundedBuffer::new(8);
        buffer.push_back("old");
        buffer.push_back("fresh");
        // push_back / pop_back yields the freshest item first
        assert_eq!(buffer.pop_back(), "fresh");
        assert_eq!(buffer.pop_back(), "old");
    }

    #[test]
    fn test_pop_timed_returns_none_on_empty() {
        let buffer: BoundedBuffer<u8> = BoundedBuffer::new(2);
        let start = Instant::now();
        assert!(buffer.pop_front_timed(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_push_timed_returns_item_on_full() {
        let buffer = BoundedBuffer::new(1);
        buffer.push_back(1);
        let PushTimedOut(rejected) = buffer
            .push_back_timed(2, Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(rejected, 2);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_blocked_push_resumes_after_pop() {
        let buffer = Arc::new(BoundedBuffer::new(1));
        buffer.push_back(1);
        let pusher = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.push_back(2))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(buffer.pop_front(), 1);
        pusher.join().unwrap();
        assert_eq!(buffer.pop_front(), 2);
    }

    #[test]
    fn test_many_producers_many_consumers_lose_nothing() {
        let buffer = Arc::new(BoundedBuffer::new(8));
        let mut producers = Vec::new();
        for p in 0..4 {
            let buffer = Arc::clone(&buffer);
            producers.push(thread::spawn(move || {
                for i in 0..250 {
                    buffer.push_back(p * 1000 + i);
                }
            }));
        }
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let buffer = Arc::clone(&buffer);
            consumers.push(thread::spawn(move || {
                (0..250).map(|_| buffer.pop_front()).collect::<Vec<i32>>()
            }));
        }
        for p in producers {
            p.join().unwrap();
        }
        let mut seen: Vec<i32> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        seen.sort_unstable();
        let mut expected: Vec<i32> = (0..4).flat_map(|p| (0..250).map(move |i| p * 1000 + i)).collect();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }
}
