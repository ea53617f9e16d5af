//! # Broker
//!
//! The broker decouples *who computes a fitness evaluation* from *who needs
//! the result*. Optimization runs register a channel and get back a pair of
//! identified buffers (raw items going out, processed items coming back)
//! while consumers (an in-process thread pool, networked TCP workers) drain
//! raw items from *any* active channel and route results back by the channel
//! id stamped on each [`Envelope`].
//!
//! The broker itself runs no evaluation loop; it is a passive rendezvous
//! point. Round-robin scanning across channels keeps one busy run from
//! starving the others, and an item is only ever handed to one consumer at a
//! time. Delivery is not guaranteed to complete: retry and abandonment policy
//! belongs to the submitting population, not the broker.
//!
//! ## Example
//!
//! ```rust
//! use gendist::broker::{Broker, WorkItem};
//! use gendist::random::FactoryRng;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Clone, Debug)]
//! struct Square(f64);
//!
//! impl WorkItem for Square {
//!     fn process(&mut self, _rng: &mut FactoryRng) -> f64 {
//!         self.0 * self.0
//!     }
//! }
//!
//! let broker: Arc<Broker<Square>> = Arc::new(Broker::new());
//! let channel = broker.register_channel();
//! broker.submit(channel, Square(3.0)).unwrap();
//!
//! // No consumer enrolled: the raw item is still there, the processed
//! // buffer stays empty.
//! assert!(broker
//!     .retrieve(channel, Duration::from_millis(10))
//!     .unwrap()
//!     .is_none());
//! ```

pub mod thread_pool;

pub use thread_pool::ThreadPoolConsumer;

use std::collections::HashMap;
use std::fmt;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::{IdentifiedBuffer, DEFAULT_CAPACITY};
use crate::error::{GeneticError, Result};
use crate::random::FactoryRng;

/// How long a consumer may wait to hand a result back before the item is
/// dropped. Bounded so one slow retriever cannot stall a consumer thread.
const PUT_TIMEOUT: Duration = Duration::from_millis(100);

/// One unit of evaluation work.
///
/// The broker treats implementations as opaque: whatever `process` does
/// (mutation, fitness calculation, simulation) happens wherever the consumer
/// runs, with randomness served by the passed-in factory front-end.
pub trait WorkItem: Send + 'static {
    /// Performs the evaluation and returns the fitness score.
    fn process(&mut self, rng: &mut FactoryRng) -> f64;
}

/// Identifies one registered channel (one concurrent optimization run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(u32);

impl ChannelId {
    /// Wraps a raw channel number.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw channel number.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A work item in flight, tagged with everything the broker needs to route
/// it home: the originating channel and the item's position in that
/// channel's submission sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<W> {
    channel: ChannelId,
    position: u64,
    fitness: Option<f64>,
    work: W,
}

impl<W> Envelope<W> {
    /// The channel this item belongs to.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// The item's position in its channel's submission sequence.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The fitness recorded by a consumer, if the item has been processed.
    pub fn fitness(&self) -> Option<f64> {
        self.fitness
    }

    /// Records the fitness computed for this item.
    pub fn set_fitness(&mut self, fitness: f64) {
        self.fitness = Some(fitness);
    }

    /// The wrapped work item.
    pub fn work(&self) -> &W {
        &self.work
    }

    /// Mutable access for the consumer running the evaluation.
    pub fn work_mut(&mut self) -> &mut W {
        &mut self.work
    }

    /// Unwraps the work item.
    pub fn into_work(self) -> W {
        self.work
    }
}

/// An execution backend that drains work from the broker.
///
/// Implementations pull via [`Broker::poll_raw`] and push results back via
/// [`Broker::put_processed`]. `shutdown` must stop the backend cooperatively
/// (in-flight evaluations finish, threads are joined, nothing is detached).
pub trait Consumer<W: WorkItem>: Send {
    /// A stable name identifying the consumer kind; duplicate names are
    /// rejected at enrolment.
    fn name(&self) -> &str;

    /// Starts the backend. Must not block.
    fn start(&mut self, broker: Arc<Broker<W>>) -> Result<()>;

    /// Stops the backend and joins its threads.
    fn shutdown(&mut self);
}

/// Configuration for a [`Broker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOptions {
    /// Capacity of each channel's raw and processed buffer (`0` =
    /// unbounded).
    pub channel_capacity: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CAPACITY,
        }
    }
}

struct ChannelPair<W> {
    raw: IdentifiedBuffer<Envelope<W>>,
    processed: IdentifiedBuffer<Envelope<W>>,
    next_position: AtomicU64,
}

struct ChannelTable<W> {
    map: HashMap<ChannelId, Arc<ChannelPair<W>>>,
    /// Registration order, used for the round-robin scan.
    order: Vec<ChannelId>,
    cursor: usize,
    next_id: u32,
}

/// The central dispatch hub between optimization runs and execution
/// backends.
pub struct Broker<W: WorkItem> {
    channels: Mutex<ChannelTable<W>>,
    /// Signalled on every submission; consumers park here when all channels
    /// are drained.
    submitted: Condvar,
    consumers: Mutex<Vec<Box<dyn Consumer<W>>>>,
    options: BrokerOptions,
    finalized: AtomicBool,
}

fn fatal_poison<G>(res: std::result::Result<G, PoisonError<G>>) -> G {
    res.unwrap_or_else(|_| {
        eprintln!("gendist: broker state poisoned, terminating");
        process::abort()
    })
}

impl<W: WorkItem> Broker<W> {
    /// Creates a broker with default options.
    pub fn new() -> Self {
        Self::with_options(BrokerOptions::default())
    }

    /// Creates a broker with the given options.
    pub fn with_options(options: BrokerOptions) -> Self {
        Self {
            channels: Mutex::new(ChannelTable {
                map: HashMap::new(),
                order: Vec::new(),
                cursor: 0,
                next_id: 0,
            }),
            submitted: Condvar::new(),
            consumers: Mutex::new(Vec::new()),
            options,
            finalized: AtomicBool::new(false),
        }
    }

    fn lock_channels(&self) -> MutexGuard<'_, ChannelTable<W>> {
        fatal_poison(self.channels.lock())
    }

    /// Allocates a fresh raw/processed buffer pair and returns its channel
    /// id.
    pub fn register_channel(&self) -> ChannelId {
        let mut table = self.lock_channels();
        // Ids may wrap around over very long processes; skip any that are
        // still in use.
        let id = loop {
            let candidate = ChannelId(table.next_id);
            table.next_id = table.next_id.wrapping_add(1);
            if !table.map.contains_key(&candidate) {
                break candidate;
            }
        };
        let pair = ChannelPair {
            raw: IdentifiedBuffer::new(self.options.channel_capacity),
            processed: IdentifiedBuffer::new(self.options.channel_capacity),
            next_position: AtomicU64::new(0),
        };
        pair.raw.set_id(id.0);
        pair.processed.set_id(id.0);
        table.map.insert(id, Arc::new(pair));
        table.order.push(id);
        debug!(channel = %id, "channel registered");
        id
    }

    /// Removes a channel. Results still in flight for it will be dropped on
    /// return.
    pub fn deregister_channel(&self, id: ChannelId) -> Result<()> {
        let mut table = self.lock_channels();
        if table.map.remove(&id).is_none() {
            return Err(GeneticError::ChannelNotRegistered(id));
        }
        table.order.retain(|&c| c != id);
        if !table.order.is_empty() {
            table.cursor %= table.order.len();
        } else {
            table.cursor = 0;
        }
        debug!(channel = %id, "channel deregistered");
        Ok(())
    }

    /// The number of currently registered channels.
    pub fn channel_count(&self) -> usize {
        self.lock_channels().order.len()
    }

    /// Submits a work item to a channel, blocking while the channel's raw
    /// buffer is full. Returns the position assigned to the item.
    ///
    /// # Errors
    ///
    /// [`GeneticError::ChannelNotRegistered`] if `id` is not currently
    /// registered.
    pub fn submit(&self, id: ChannelId, work: W) -> Result<u64> {
        let pair = self
            .lock_channels()
            .map
            .get(&id)
            .cloned()
            .ok_or(GeneticError::ChannelNotRegistered(id))?;
        let position = pair.next_position.fetch_add(1, Ordering::SeqCst);
        pair.raw.push_back(Envelope {
            channel: id,
            position,
            fitness: None,
            work,
        });
        // Serialize with parked consumers so the notification cannot fall
        // between their scan and their wait.
        drop(self.lock_channels());
        self.submitted.notify_all();
        Ok(position)
    }

    /// Retrieves one processed item from a channel, waiting at most
    /// `timeout`. `None` means nothing returned in time, which is an
    /// expected outcome, not an error.
    pub fn retrieve(&self, id: ChannelId, timeout: Duration) -> Result<Option<Envelope<W>>> {
        let pair = self
            .lock_channels()
            .map
            .get(&id)
            .cloned()
            .ok_or(GeneticError::ChannelNotRegistered(id))?;
        Ok(pair.processed.pop_front_timed(timeout))
    }

    /// Retrieves one processed item from a channel, blocking until one
    /// arrives.
    pub fn retrieve_blocking(&self, id: ChannelId) -> Result<Envelope<W>> {
        let pair = self
            .lock_channels()
            .map
            .get(&id)
            .cloned()
            .ok_or(GeneticError::ChannelNotRegistered(id))?;
        Ok(pair.processed.pop_front())
    }

    /// Pulls the next raw item from any active channel, scanning channels
    /// round-robin so no run is starved. Waits up to `timeout` when
    /// everything is drained.
    ///
    /// This is the single entry point for all consumers, in-process and
    /// networked alike.
    pub fn poll_raw(&self, timeout: Duration) -> Option<Envelope<W>> {
        let deadline = Instant::now() + timeout;
        let mut table = self.lock_channels();
        loop {
            let count = table.order.len();
            if count > 0 {
                let start = table.cursor % count;
                for offset in 0..count {
                    let id = table.order[(start + offset) % count];
                    if let Some(pair) = table.map.get(&id).cloned() {
                        if let Some(envelope) = pair.raw.try_pop_front() {
                            table.cursor = (start + offset + 1) % count;
                            return Some(envelope);
                        }
                    }
                }
                table.cursor = (start + 1) % count;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _wait) = fatal_poison(self.submitted.wait_timeout(table, remaining));
            table = guard;
        }
    }

    /// Routes a processed item back to its channel's processed buffer.
    ///
    /// Returns whether the item was delivered. An item whose channel has
    /// been deregistered in the meantime is dropped; the submitting run has
    /// already moved on, so this is not an error.
    pub fn put_processed(&self, envelope: Envelope<W>) -> bool {
        let id = envelope.channel;
        let pair = match self.lock_channels().map.get(&id).cloned() {
            Some(pair) => pair,
            None => {
                debug!(channel = %id, "dropping result for deregistered channel");
                return false;
            }
        };
        match pair.processed.push_back_timed(envelope, PUT_TIMEOUT) {
            Ok(()) => true,
            Err(_) => {
                warn!(channel = %id, "processed buffer full, dropping result");
                false
            }
        }
    }

    /// Enrols a consumer on a shared broker handle and starts it
    /// immediately. A consumer with an already-enrolled name is ignored with
    /// a warning.
    ///
    /// Consumers keep a handle to the broker for as long as they run, so
    /// call [`shutdown`](Broker::shutdown) to end their threads; dropping
    /// the last caller-held handle alone will not.
    pub fn enroll(broker: &Arc<Broker<W>>, mut consumer: Box<dyn Consumer<W>>) -> Result<()> {
        let mut consumers = fatal_poison(broker.consumers.lock());
        if consumers.iter().any(|c| c.name() == consumer.name()) {
            warn!(name = consumer.name(), "consumer already enrolled, ignoring");
            return Ok(());
        }
        consumer.start(Arc::clone(broker))?;
        debug!(name = consumer.name(), "consumer enrolled");
        consumers.push(consumer);
        Ok(())
    }

    /// Whether any consumer has been enrolled.
    pub fn has_consumers(&self) -> bool {
        !fatal_poison(self.consumers.lock()).is_empty()
    }

    /// Stops all consumers and clears the channel table. Safe to call more
    /// than once.
    pub fn shutdown(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut consumers = fatal_poison(self.consumers.lock());
        for consumer in consumers.iter_mut() {
            consumer.shutdown();
        }
        consumers.clear();
        let mut table = self.lock_channels();
        table.map.clear();
        table.order.clear();
        table.cursor = 0;
    }
}

impl<W: WorkItem> Default for Broker<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: WorkItem> Drop for Broker<W> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload(i64);

    impl WorkItem for Payload {
        fn process(&mut self, _rng: &mut FactoryRng) -> f64 {
            self.0 as f64
        }
    }

    #[test]
    fn test_submit_to_unregistered_channel_fails() {
        let broker: Broker<Payload> = Broker::new();
        let err = broker.submit(ChannelId::new(42), Payload(1)).unwrap_err();
        assert!(matches!(err, GeneticError::ChannelNotRegistered(_)));
    }

    #[test]
    fn test_register_submit_poll_roundtrip() {
        let broker: Broker<Payload> = Broker::new();
        let channel = broker.register_channel();
        let position = broker.submit(channel, Payload(7)).unwrap();
        assert_eq!(position, 0);

        let envelope = broker.poll_raw(Duration::from_millis(100)).unwrap();
        assert_eq!(envelope.channel(), channel);
        assert_eq!(envelope.position(), 0);
        assert_eq!(envelope.work(), &Payload(7));
    }

    #[test]
    fn test_positions_increase_per_channel() {
        let broker: Broker<Payload> = Broker::new();
        let channel = broker.register_channel();
        for expected in 0..5 {
            let position = broker.submit(channel, Payload(expected)).unwrap();
            assert_eq!(position, expected as u64);
        }
    }

    #[test]
    fn test_retrieve_times_out_without_consumer() {
        let broker: Broker<Payload> = Broker::new();
        let channel = broker.register_channel();
        broker.submit(channel, Payload(1)).unwrap();
        let result = broker.retrieve(channel, Duration::from_millis(30)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_round_robin_serves_all_channels() {
        let broker: Broker<Payload> = Broker::new();
        let first = broker.register_channel();
        let second = broker.register_channel();
        for i in 0..3 {
            broker.submit(first, Payload(i)).unwrap();
            broker.submit(second, Payload(100 + i)).unwrap();
        }
        let mut served = Vec::new();
        for _ in 0..6 {
            served.push(broker.poll_raw(Duration::from_millis(50)).unwrap().channel());
        }
        // Neither channel is drained completely before the other is served.
        let first_three: Vec<ChannelId> = served.iter().take(3).copied().collect();
        assert!(first_three.contains(&first));
        assert!(first_three.contains(&second));
    }

    #[test]
    fn test_put_processed_routes_by_channel() {
        let broker: Broker<Payload> = Broker::new();
        let channel = broker.register_channel();
        broker.submit(channel, Payload(3)).unwrap();
        let mut envelope = broker.poll_raw(Duration::from_millis(50)).unwrap();
        envelope.set_fitness(9.0);
        assert!(broker.put_processed(envelope));

        let back = broker
            .retrieve(channel, Duration::from_millis(50))
            .unwrap()
            .unwrap();
        assert_eq!(back.fitness(), Some(9.0));
        assert_eq!(back.into_work(), Payload(3));
    }

    #[test]
    fn test_put_processed_drops_for_deregistered_channel() {
        let broker: Broker<Payload> = Broker::new();
        let channel = broker.register_channel();
        broker.submit(channel, Payload(3)).unwrap();
        let envelope = broker.poll_raw(Duration::from_millis(50)).unwrap();
        broker.deregister_channel(channel).unwrap();
        assert!(!broker.put_processed(envelope));
    }

    #[test]
    fn test_deregister_twice_fails() {
        let broker: Broker<Payload> = Broker::new();
        let channel = broker.register_channel();
        broker.deregister_channel(channel).unwrap();
        assert!(matches!(
            broker.deregister_channel(channel),
            Err(GeneticError::ChannelNotRegistered(_))
        ));
    }

    #[test]
    fn test_poll_raw_times_out_when_empty() {
        let broker: Broker<Payload> = Broker::new();
        broker.register_channel();
        let start = Instant::now();
        assert!(broker.poll_raw(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
