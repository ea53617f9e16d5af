//! # Random Number Factory
//!
//! Seeding and running a fresh generator for every mutation operator is
//! expensive, and sharing one generator across threads puts a lock on the
//! hottest path of an evolutionary run. The [`RandomFactory`] amortizes both
//! costs: a pool of producer threads, each owning a *private* seeded
//! generator, continuously fills a bounded buffer with [`RandomPacket`]s,
//! and any number of [`FactoryRng`] front-ends check packets out and consume
//! them locally with no synchronization at all.
//!
//! Partially used packets can be handed back for recycling; a producer
//! regenerates the consumed prefix instead of discarding the still-fresh
//! tail.
//!
//! Exactly one live factory is allowed per process (a second concurrent
//! instance would double-seed the producer pool); the [`global`] accessor
//! lazily creates that single shared instance.
//!
//! ## Example
//!
//! ```rust
//! use gendist::random::factory;
//!
//! let factory = factory::global().unwrap();
//! let mut rng = factory.rng();
//! let value = rng.uniform();
//! assert!((0.0..1.0).contains(&value));
//! ```

use std::collections::VecDeque;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::BoundedBuffer;
use crate::error::{GeneticError, Result};
use crate::random::packet::{RandomPacket, DEFAULT_PACKET_SIZE};
use crate::random::seed::{entropy_seed, SeedManager, DEFAULT_MIN_UNIQUE_SEEDS};

/// Default number of packet producer threads.
pub const DEFAULT_PRODUCER_THREADS: usize = 2;

/// Default capacity of the fresh-packet and recycling buffers.
pub const DEFAULT_FACTORY_BUFFER_CAPACITY: usize = 64;

/// How long the producer waits for buffer space before re-checking its stop
/// flags.
const PRODUCER_PUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// How long a seed request during fallback generation may wait before the
/// factory seeds from entropy directly.
const FALLBACK_SEED_TIMEOUT: Duration = Duration::from_millis(50);

/// Trap against a second concurrent factory instance in the same process.
static INSTANCE_LIVE: AtomicBool = AtomicBool::new(false);

/// Configuration for a [`RandomFactory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryOptions {
    /// Number of producer threads filling the packet buffer.
    pub producer_threads: usize,
    /// Number of `[0, 1)` values per packet.
    pub packet_size: usize,
    /// Capacity of the fresh and recycling packet buffers.
    pub buffer_capacity: usize,
    /// Internal cap on [`RandomFactory::checkout_packet`] before it falls
    /// back to local generation.
    pub checkout_timeout: Duration,
    /// Uniqueness window of the owned [`SeedManager`].
    pub min_unique_seeds: usize,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            producer_threads: DEFAULT_PRODUCER_THREADS,
            packet_size: DEFAULT_PACKET_SIZE,
            buffer_capacity: DEFAULT_FACTORY_BUFFER_CAPACITY,
            checkout_timeout: Duration::from_millis(200),
            min_unique_seeds: DEFAULT_MIN_UNIQUE_SEEDS,
        }
    }
}

/// A process-wide service producing packets of uniform `[0, 1)` numbers on a
/// scalable pool of producer threads.
///
/// The factory owns exactly one [`SeedManager`]; every producer generator and
/// every external seed request is served from its decorrelated stream.
#[derive(Debug)]
pub struct RandomFactory {
    fresh: Arc<BoundedBuffer<RandomPacket>>,
    returned: Arc<BoundedBuffer<RandomPacket>>,
    seeds: SeedManager,
    options: FactoryOptions,
    stop: Arc<AtomicBool>,
    producers: Mutex<Vec<Producer>>,
}

#[derive(Debug)]
struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl RandomFactory {
    /// Creates the factory and starts its producer threads.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if another factory instance is
    /// currently alive in this process, or if `producer_threads` or
    /// `packet_size` is zero.
    pub fn new(options: FactoryOptions) -> Result<Self> {
        if options.producer_threads == 0 {
            return Err(GeneticError::Configuration(
                "producer_threads must be at least 1".to_string(),
            ));
        }
        if options.packet_size == 0 {
            return Err(GeneticError::Configuration(
                "packet_size must be at least 1".to_string(),
            ));
        }
        if INSTANCE_LIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(GeneticError::Configuration(
                "a RandomFactory instance already exists in this process; share it instead of constructing a second one".to_string(),
            ));
        }

        let factory = Self {
            fresh: Arc::new(BoundedBuffer::new(options.buffer_capacity)),
            returned: Arc::new(BoundedBuffer::new(options.buffer_capacity)),
            seeds: SeedManager::with_min_unique(options.min_unique_seeds),
            options: options.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            producers: Mutex::new(Vec::new()),
        };
        factory.set_producer_threads(options.producer_threads)?;
        debug!(
            producers = options.producer_threads,
            packet_size = options.packet_size,
            "random factory started"
        );
        Ok(factory)
    }

    /// The options the factory was built with.
    pub fn options(&self) -> &FactoryOptions {
        &self.options
    }

    /// The owned seed manager, e.g. for pinning the start seed of a
    /// reproducible run.
    pub fn seed_manager(&self) -> &SeedManager {
        &self.seeds
    }

    /// Retrieves a start seed from the owned seed manager.
    pub fn seed(&self) -> u32 {
        self.seeds.seed()
    }

    /// The number of currently running producer threads.
    pub fn producer_threads(&self) -> usize {
        self.lock_producers().len()
    }

    /// Scales the producer pool up or down while the factory is running.
    ///
    /// Surplus producers are signalled and joined; missing ones are spawned
    /// with fresh seeds.
    pub fn set_producer_threads(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(GeneticError::Configuration(
                "producer_threads must be at least 1".to_string(),
            ));
        }
        let mut producers = self.lock_producers();
        while producers.len() > count {
            if let Some(producer) = producers.pop() {
                producer.stop.store(true, Ordering::SeqCst);
                join_fatal(producer.handle);
            }
        }
        let packet_size = self.options.packet_size;
        while producers.len() < count {
            let index = producers.len();
            let seed = self.seeds.seed();
            let own_stop = Arc::new(AtomicBool::new(false));
            let fresh = Arc::clone(&self.fresh);
            let returned = Arc::clone(&self.returned);
            let global_stop = Arc::clone(&self.stop);
            let thread_stop = Arc::clone(&own_stop);
            let handle = thread::Builder::new()
                .name(format!("gendist-rng-{}", index))
                .spawn(move || {
                    produce_packets(seed, packet_size, &fresh, &returned, &global_stop, &thread_stop)
                })
                .expect("failed to spawn random producer thread");
            producers.push(Producer {
                stop: own_stop,
                handle,
            });
        }
        Ok(())
    }

    /// Checks a packet out of the factory.
    ///
    /// Blocks for at most the configured checkout timeout; if the factory is
    /// saturated the packet is generated locally from a fresh seed instead,
    /// so callers can never deadlock here.
    pub fn checkout_packet(&self) -> RandomPacket {
        if let Some(packet) = self.fresh.pop_front_timed(self.options.checkout_timeout) {
            return packet;
        }
        warn!("random factory saturated, generating a packet on the calling thread");
        let seed = self
            .seeds
            .seed_timed(FALLBACK_SEED_TIMEOUT)
            .unwrap_or_else(entropy_seed);
        let mut rng = StdRng::seed_from_u64(u64::from(seed));
        RandomPacket::generate(self.options.packet_size, &mut rng)
    }

    /// Hands a (partially) used packet back for recycling. Under
    /// backpressure the packet is silently dropped.
    pub fn return_packet(&self, packet: RandomPacket) {
        let _ = self.returned.try_push_back(packet);
    }

    /// Creates a new client-side front-end drawing from this factory.
    ///
    /// Takes the handle by value; clone the `Arc` first if the factory is
    /// still needed afterwards.
    pub fn rng(self: Arc<Self>) -> FactoryRng {
        FactoryRng::new(self)
    }

    fn lock_producers(&self) -> MutexGuard<'_, Vec<Producer>> {
        self.producers.lock().unwrap_or_else(|_| {
            eprintln!("gendist: factory producer table poisoned, terminating");
            process::abort()
        })
    }
}

impl Drop for RandomFactory {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let mut producers = self.lock_producers();
        for producer in producers.drain(..) {
            producer.stop.store(true, Ordering::SeqCst);
            join_fatal(producer.handle);
        }
        drop(producers);
        INSTANCE_LIVE.store(false, Ordering::SeqCst);
    }
}

/// A producer thread that cannot be joined indicates broken concurrency
/// primitives; there is no way to continue safely.
fn join_fatal(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        eprintln!("gendist: random producer thread panicked, terminating");
        process::abort();
    }
}

/// The producer loop: recycle returned packets when possible, generate fresh
/// ones otherwise, until stopped.
fn produce_packets(
    seed: u32,
    packet_size: usize,
    fresh: &BoundedBuffer<RandomPacket>,
    returned: &BoundedBuffer<RandomPacket>,
    global_stop: &AtomicBool,
    own_stop: &AtomicBool,
) {
    let mut rng = StdRng::seed_from_u64(u64::from(seed));
    let stopped = || global_stop.load(Ordering::Relaxed) || own_stop.load(Ordering::Relaxed);

    while !stopped() {
        let mut packet = match returned.try_pop_front() {
            Some(mut used) => {
                used.refill(&mut rng);
                used
            }
            None => RandomPacket::generate(packet_size, &mut rng),
        };
        // Bounded wait so a full buffer cannot keep the thread from
        // observing a stop request.
        loop {
            match fresh.push_back_timed(packet, PRODUCER_PUSH_TIMEOUT) {
                Ok(()) => break,
                Err(timed_out) => {
                    if stopped() {
                        return;
                    }
                    packet = timed_out.0;
                }
            }
        }
    }
}

/// Returns the process-wide shared factory, creating it with default options
/// on first use.
///
/// # Errors
///
/// Returns a configuration error if a caller-owned factory instance is
/// currently alive (the process-wide instance cannot coexist with it).
pub fn global() -> Result<Arc<RandomFactory>> {
    static GLOBAL: OnceLock<Arc<RandomFactory>> = OnceLock::new();
    static INIT: Mutex<()> = Mutex::new(());

    if let Some(factory) = GLOBAL.get() {
        return Ok(Arc::clone(factory));
    }
    let _guard = INIT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(factory) = GLOBAL.get() {
        return Ok(Arc::clone(factory));
    }
    let factory = Arc::new(RandomFactory::new(FactoryOptions::default())?);
    let _ = GLOBAL.set(Arc::clone(&factory));
    Ok(factory)
}

/// A client-side random number front-end.
///
/// Owns the packet it is currently consuming, so reading numbers is
/// lock-free; when the packet runs out it is swapped for a fresh one and the
/// spent packet goes back to the factory for recycling. The front-end also
/// returns its packet on drop.
#[derive(Debug)]
pub struct FactoryRng {
    factory: Arc<RandomFactory>,
    packet: Option<RandomPacket>,
    cached_normal: Option<f64>,
}

impl FactoryRng {
    /// Creates a front-end for `factory`. The first packet is checked out
    /// lazily on first use.
    pub fn new(factory: Arc<RandomFactory>) -> Self {
        Self {
            factory,
            packet: None,
            cached_normal: None,
        }
    }

    /// The factory this front-end draws from.
    pub fn factory(&self) -> &Arc<RandomFactory> {
        &self.factory
    }

    /// Returns a uniform random number in `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        loop {
            if self.packet.is_none() {
                self.packet = Some(self.factory.checkout_packet());
            }
            // Just ensured above.
            if let Some(value) = self.packet.as_mut().and_then(RandomPacket::next) {
                return value;
            }
            let spent = self.packet.take();
            self.packet = Some(self.factory.checkout_packet());
            if let Some(spent) = spent {
                self.factory.return_packet(spent);
            }
        }
    }

    /// Returns a uniform random number in `[from, to)`.
    pub fn uniform_range(&mut self, from: f64, to: f64) -> f64 {
        from + (to - from) * self.uniform()
    }

    /// Generates `num` uniform random numbers within the given range.
    ///
    /// # Parameters
    ///
    /// - `from`: The lower bound of the range (inclusive).
    /// - `to`: The upper bound of the range (exclusive).
    /// - `num`: The number of random numbers to generate.
    pub fn fetch_uniform(&mut self, from: f64, to: f64, num: usize) -> VecDeque<f64> {
        let mut uniform_numbers = VecDeque::with_capacity(num);
        uniform_numbers.extend((0..num).map(|_| self.uniform_range(from, to)));
        uniform_numbers
    }

    /// Returns `true` with probability `p`.
    pub fn below(&mut self, p: f64) -> bool {
        self.uniform() < p
    }

    /// Returns a uniform index in `[0, len)`. `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0);
        let idx = (self.uniform() * len as f64) as usize;
        idx.min(len - 1)
    }

    /// Returns a standard-normal random number.
    ///
    /// Box–Muller produces values in pairs; the second value of each pair is
    /// cached per front-end instance and served by the next call.
    pub fn normal(&mut self) -> f64 {
        if let Some(cached) = self.cached_normal.take() {
            return cached;
        }
        // 1 - u maps [0, 1) onto (0, 1], keeping ln() finite.
        let u1 = 1.0 - self.uniform();
        let u2 = self.uniform();
        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = 2.0 * std::f64::consts::PI * u2;
        self.cached_normal = Some(radius * angle.sin());
        radius * angle.cos()
    }

    /// Returns a normal random number with the given mean and standard
    /// deviation.
    pub fn gaussian(&mut self, mean: f64, sigma: f64) -> f64 {
        mean + sigma * self.normal()
    }
}

impl Drop for FactoryRng {
    fn drop(&mut self) {
        if let Some(packet) = self.packet.take() {
            self.factory.return_packet(packet);
        }
    }
}
