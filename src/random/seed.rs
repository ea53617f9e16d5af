//! # Seed Manager
//!
//! Random number streams started close together in time from successive
//! seeds can be highly correlated. The [`SeedManager`] therefore hands out
//! start seeds in a pseudo-random order of their own: a background thread
//! draws seed candidates from a single deterministic generator and queues
//! them, rejecting any candidate that already occurred within a sliding
//! window of recent deliveries. The result is a stream in which no window of
//! `min_unique_seeds` consecutive seeds contains a duplicate.
//!
//! The master seed for the generator comes from the operating system's
//! entropy pool, falling back to a fixed default when no entropy source is
//! available. It can be pinned to a known value with
//! [`set_start_seed`](SeedManager::set_start_seed) *before* the first seed is
//! requested, which makes whole optimization runs reproducible.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, warn};

use crate::buffer::BoundedBuffer;
use crate::error::{GeneticError, Result};

/// Used when the OS entropy pool cannot be read. The value follows the
/// canonical Mersenne-Twister default seed.
pub const DEFAULT_START_SEED: u32 = 5489;

/// The guaranteed number of consecutive deliveries without a duplicate.
pub const DEFAULT_MIN_UNIQUE_SEEDS: usize = 5000;

/// How long the producer waits for queue space before re-checking its stop
/// flag.
const PRODUCER_PUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Produces a stream of decorrelated `u32` start seeds for independent
/// random number generators.
///
/// The producer thread is started lazily on the first seed request and is
/// signalled and joined on drop; stopping never blocks indefinitely because
/// the producer only ever waits on the queue with a bounded timeout.
#[derive(Debug)]
pub struct SeedManager {
    queue: Arc<BoundedBuffer<u32>>,
    stop: Arc<AtomicBool>,
    min_unique_seeds: usize,
    state: Mutex<SeedState>,
}

#[derive(Debug)]
struct SeedState {
    start_seed: Option<u32>,
    producer: Option<JoinHandle<()>>,
}

impl SeedManager {
    /// Creates a seed manager with the default uniqueness window.
    pub fn new() -> Self {
        Self::with_min_unique(DEFAULT_MIN_UNIQUE_SEEDS)
    }

    /// Creates a seed manager guaranteeing no duplicate within any window of
    /// `min_unique_seeds` consecutive deliveries. A window below 2 disables
    /// decorrelation but keeps the queueing behavior.
    pub fn with_min_unique(min_unique_seeds: usize) -> Self {
        Self {
            queue: Arc::new(BoundedBuffer::new(min_unique_seeds.max(1))),
            stop: Arc::new(AtomicBool::new(false)),
            min_unique_seeds,
            state: Mutex::new(SeedState {
                start_seed: None,
                producer: None,
            }),
        }
    }

    /// Pins the master seed to a fixed value, making the seed stream
    /// deterministic.
    ///
    /// Only effective before the first seed has been requested; later calls
    /// are ignored and report `false` (first-writer-wins, like a buffer id).
    /// The value `0` is reserved as the "unset" marker and rejected.
    pub fn set_start_seed(&self, start_seed: u32) -> Result<bool> {
        if start_seed == 0 {
            return Err(GeneticError::Configuration(
                "start seed 0 is reserved; choose a non-zero seed".to_string(),
            ));
        }
        let mut state = lock_state(&self.state);
        if state.producer.is_some() || state.start_seed.is_some() {
            return Ok(false);
        }
        state.start_seed = Some(start_seed);
        Ok(true)
    }

    /// The master seed, once it has been set or resolved. `None` until then.
    pub fn start_seed(&self) -> Option<u32> {
        lock_state(&self.state).start_seed
    }

    /// The configured uniqueness window.
    pub fn min_unique_seeds(&self) -> usize {
        self.min_unique_seeds
    }

    /// Whether the producer thread has been started.
    pub fn is_seeding(&self) -> bool {
        lock_state(&self.state).producer.is_some()
    }

    /// Retrieves the next seed, blocking until one is available.
    pub fn seed(&self) -> u32 {
        self.ensure_producer();
        self.queue.pop_front()
    }

    /// Retrieves the next seed, or `None` if none became available within
    /// `timeout`.
    pub fn seed_timed(&self, timeout: Duration) -> Option<u32> {
        self.ensure_producer();
        self.queue.pop_front_timed(timeout)
    }

    /// Starts the producer thread if it is not running yet, resolving the
    /// master seed on the way.
    fn ensure_producer(&self) {
        let mut state = lock_state(&self.state);
        if state.producer.is_some() {
            return;
        }
        let master = state.start_seed.unwrap_or_else(entropy_seed);
        state.start_seed = Some(master);

        let queue = Arc::clone(&self.queue);
        let stop = Arc::clone(&self.stop);
        let window = self.min_unique_seeds;
        let handle = thread::Builder::new()
            .name("gendist-seed".to_string())
            .spawn(move || produce_seeds(master, window, &queue, &stop))
            .expect("failed to spawn seed producer thread");
        state.producer = Some(handle);
        debug!(master, window, "seed producer started");
    }
}

impl Default for SeedManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SeedManager {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = lock_state(&self.state).producer.take() {
            if handle.join().is_err() {
                // The producer treats its own failures as fatal, so a panic
                // here means the process is already going down.
                warn!("seed producer thread panicked before join");
            }
        }
    }
}

fn lock_state(state: &Mutex<SeedState>) -> std::sync::MutexGuard<'_, SeedState> {
    state.lock().unwrap_or_else(|_| {
        eprintln!("gendist: seed manager state poisoned, terminating");
        std::process::abort()
    })
}

/// Reads a master seed from the OS entropy pool, falling back to
/// [`DEFAULT_START_SEED`].
pub(crate) fn entropy_seed() -> u32 {
    let mut bytes = [0u8; 4];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => u32::from_le_bytes(bytes),
        Err(e) => {
            warn!(error = %e, fallback = DEFAULT_START_SEED, "OS entropy unavailable, using the default start seed");
            DEFAULT_START_SEED
        }
    }
}

/// The producer loop: draw, decorrelate, queue, until stopped.
fn produce_seeds(master: u32, window: usize, queue: &BoundedBuffer<u32>, stop: &AtomicBool) {
    let mut rng = StdRng::seed_from_u64(u64::from(master));
    let mut recent: VecDeque<u32> = VecDeque::with_capacity(window);
    let mut recent_set: HashSet<u32> = HashSet::with_capacity(window);

    while !stop.load(Ordering::Relaxed) {
        let candidate: u32 = rng.gen();
        // Redraw on collision with the sliding window.
        if window >= 2 && recent_set.contains(&candidate) {
            continue;
        }
        match queue.push_back_timed(candidate, PRODUCER_PUSH_TIMEOUT) {
            Ok(()) => {
                if window >= 2 {
                    recent.push_back(candidate);
                    recent_set.insert(candidate);
                    if recent.len() > window {
                        if let Some(old) = recent.pop_front() {
                            recent_set.remove(&old);
                        }
                    }
                }
            }
            // Queue full: drop the candidate and re-check the stop flag.
            Err(_) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicates_within_window() {
        let manager = SeedManager::with_min_unique(64);
        let seeds: Vec<u32> = (0..65).map(|_| manager.seed()).collect();
        for window in seeds.windows(64) {
            let unique: HashSet<&u32> = window.iter().collect();
            assert_eq!(unique.len(), window.len());
        }
    }

    #[test]
    fn test_set_start_seed_makes_stream_deterministic() {
        let first = SeedManager::with_min_unique(16);
        first.set_start_seed(42).unwrap();
        let a: Vec<u32> = (0..8).map(|_| first.seed()).collect();

        let second = SeedManager::with_min_unique(16);
        second.set_start_seed(42).unwrap();
        let b: Vec<u32> = (0..8).map(|_| second.seed()).collect();

        assert_eq!(a, b);
    }

    #[test]
    fn test_start_seed_is_first_writer_wins() {
        let manager = SeedManager::with_min_unique(16);
        assert!(manager.set_start_seed(7).unwrap());
        assert!(!manager.set_start_seed(8).unwrap());
        assert_eq!(manager.start_seed(), Some(7));
    }

    #[test]
    fn test_start_seed_rejected_after_first_request() {
        let manager = SeedManager::with_min_unique(16);
        let _ = manager.seed();
        assert!(!manager.set_start_seed(7).unwrap());
    }

    #[test]
    fn test_zero_start_seed_is_a_configuration_error() {
        let manager = SeedManager::with_min_unique(16);
        assert!(matches!(
            manager.set_start_seed(0),
            Err(GeneticError::Configuration(_))
        ));
    }

    #[test]
    fn test_seed_timed_delivers() {
        let manager = SeedManager::with_min_unique(16);
        assert!(manager.seed_timed(Duration::from_secs(5)).is_some());
    }

    #[test]
    fn test_drop_joins_producer_quickly() {
        let manager = SeedManager::with_min_unique(4);
        let _ = manager.seed();
        // Queue is likely full here; drop must still complete.
        drop(manager);
    }
}
