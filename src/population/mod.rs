//! # Broker Population
//!
//! The generation-level bridge between an evolutionary loop and the broker:
//! each generation, every individual is submitted into the population's
//! channel and the loop blocks until *enough* results have come back.
//!
//! "Enough" is deliberately less than "all". The population waits for the
//! first result, measures how long it took (`T`), and then grants the rest
//! of the generation a grace period scaled by the wait factor: no waiting
//! past `T * (wait_factor + 1)` after submission. Individuals that have not
//! returned by then are treated as non-contributors and dropped from the
//! generation, never re-submitted. This bounds the wall-clock cost of a
//! generation even when remote workers die mid-evaluation, at the price of
//! occasionally discarding in-flight work.
//!
//! A wait factor of `0` disables the bound and waits for the full
//! generation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::{Broker, ChannelId, Envelope, WorkItem};
use crate::error::{GeneticError, Result};

/// Default grace multiplier on the first-arrival latency.
pub const DEFAULT_WAIT_FACTOR: u32 = 2;

/// Granularity of the retrieval wait; bounds how often stop conditions are
/// re-checked.
const RETRIEVE_SLICE: Duration = Duration::from_millis(50);

/// Configuration for a [`BrokerPopulation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationOptions {
    /// Grace multiplier: after the first result arrives at elapsed time `T`,
    /// collection stops at `T * (wait_factor + 1)`. `0` waits for the full
    /// generation.
    pub wait_factor: u32,
    /// Upper bound on the wait for the *first* result of a generation.
    /// `None` waits indefinitely.
    pub first_timeout: Option<Duration>,
}

impl Default for PopulationOptions {
    fn default() -> Self {
        Self {
            wait_factor: DEFAULT_WAIT_FACTOR,
            first_timeout: None,
        }
    }
}

/// Submits generations of work items to a broker channel and collects the
/// results under the wait-factor policy.
///
/// Registers its channel on construction and deregisters it on drop, so one
/// `BrokerPopulation` is exactly one concurrent optimization run from the
/// broker's point of view.
pub struct BrokerPopulation<W: WorkItem> {
    broker: Arc<Broker<W>>,
    channel: ChannelId,
    options: PopulationOptions,
    /// Position of the first item of the current generation; results below
    /// it are stragglers from an earlier generation.
    generation_base: u64,
}

impl<W: WorkItem> BrokerPopulation<W> {
    /// Registers a fresh channel on `broker` with default options.
    pub fn new(broker: Arc<Broker<W>>) -> Self {
        Self::with_options(broker, PopulationOptions::default())
    }

    /// Registers a fresh channel on `broker` with the given options.
    pub fn with_options(broker: Arc<Broker<W>>, options: PopulationOptions) -> Self {
        let channel = broker.register_channel();
        Self {
            broker,
            channel,
            options,
            generation_base: 0,
        }
    }

    /// The channel this population submits to.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// The configured wait factor.
    pub fn wait_factor(&self) -> u32 {
        self.options.wait_factor
    }

    /// Changes the wait factor for subsequent generations.
    pub fn set_wait_factor(&mut self, wait_factor: u32) {
        self.options.wait_factor = wait_factor;
    }

    /// Changes the first-result timeout for subsequent generations.
    pub fn set_first_timeout(&mut self, first_timeout: Option<Duration>) {
        self.options.first_timeout = first_timeout;
    }

    /// Submits one generation of work items and collects whatever returns
    /// within the wait-factor bound.
    ///
    /// The result is slot-indexed: `returned[i]` corresponds to `items[i]`
    /// and is `None` if that individual never came back in time. Stragglers
    /// from earlier generations arriving during collection are discarded.
    ///
    /// # Errors
    ///
    /// [`GeneticError::EmptyPopulation`] for an empty generation, and
    /// [`GeneticError::GenerationTimeout`] if `first_timeout` is set and
    /// expires before anything returns.
    pub fn evaluate_generation(&mut self, items: Vec<W>) -> Result<Vec<Option<Envelope<W>>>> {
        if items.is_empty() {
            return Err(GeneticError::EmptyPopulation);
        }
        let count = items.len();

        // Submit everything, remembering where this generation starts in
        // the channel's position sequence.
        let mut base = None;
        for item in items {
            let position = self.broker.submit(self.channel, item)?;
            base.get_or_insert(position);
        }
        let base = base.unwrap_or(self.generation_base);
        self.generation_base = base;

        let started = Instant::now();
        let mut results: Vec<Option<Envelope<W>>> = (0..count).map(|_| None).collect();
        let mut returned = 0usize;

        // Phase one: wait for the first result.
        let first_latency = loop {
            if let Some(limit) = self.options.first_timeout {
                if started.elapsed() >= limit {
                    return Err(GeneticError::GenerationTimeout(format!(
                        "no result within the first-result timeout of {:?}",
                        limit
                    )));
                }
            }
            if let Some(envelope) = self.broker.retrieve(self.channel, RETRIEVE_SLICE)? {
                if self.accept(envelope, base, &mut results, &mut returned) {
                    break started.elapsed();
                }
            }
        };
        debug!(
            channel = %self.channel,
            first_latency_ms = first_latency.as_millis() as u64,
            "first result arrived"
        );

        // Phase two: grant the rest of the generation the scaled grace
        // period.
        let deadline = if self.options.wait_factor == 0 {
            None
        } else {
            Some(started + first_latency * (self.options.wait_factor + 1))
        };
        while returned < count {
            let slice = match deadline {
                None => RETRIEVE_SLICE,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    remaining.min(RETRIEVE_SLICE)
                }
            };
            if let Some(envelope) = self.broker.retrieve(self.channel, slice)? {
                self.accept(envelope, base, &mut results, &mut returned);
            }
        }

        if returned < count {
            warn!(
                channel = %self.channel,
                returned,
                submitted = count,
                "generation proceeding without the full population"
            );
        }
        Ok(results)
    }

    /// Files a returned envelope into its generation slot. Stragglers and
    /// duplicates are discarded.
    fn accept(
        &self,
        envelope: Envelope<W>,
        base: u64,
        results: &mut [Option<Envelope<W>>],
        returned: &mut usize,
    ) -> bool {
        let slot = match envelope.position().checked_sub(base) {
            Some(slot) if (slot as usize) < results.len() => slot as usize,
            _ => {
                debug!(
                    channel = %self.channel,
                    position = envelope.position(),
                    "discarding result from an earlier generation"
                );
                return false;
            }
        };
        if results[slot].is_some() {
            debug!(channel = %self.channel, slot, "discarding duplicate result");
            return false;
        }
        results[slot] = Some(envelope);
        *returned += 1;
        true
    }
}

impl<W: WorkItem> Drop for BrokerPopulation<W> {
    fn drop(&mut self) {
        let _ = self.broker.deregister_channel(self.channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::FactoryRng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[derive(Debug, Clone, PartialEq)]
    struct Value(f64);

    impl WorkItem for Value {
        fn process(&mut self, _rng: &mut FactoryRng) -> f64 {
            self.0
        }
    }

    /// A hand-rolled consumer thread: echoes items back, optionally delaying
    /// everything after the first item of each run.
    fn echo_consumer(
        broker: Arc<Broker<Value>>,
        stop: Arc<AtomicBool>,
        delay_after_first: Option<Duration>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut seen = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let Some(mut envelope) = broker.poll_raw(Duration::from_millis(20)) else {
                    continue;
                };
                if seen > 0 {
                    if let Some(delay) = delay_after_first {
                        thread::sleep(delay);
                    }
                }
                seen += 1;
                let fitness = envelope.work().0;
                envelope.set_fitness(fitness);
                broker.put_processed(envelope);
            }
        })
    }

    #[test]
    fn test_full_generation_returns() {
        let broker: Arc<Broker<Value>> = Arc::new(Broker::new());
        let stop = Arc::new(AtomicBool::new(false));
        let consumer = echo_consumer(Arc::clone(&broker), Arc::clone(&stop), None);

        let mut population = BrokerPopulation::new(Arc::clone(&broker));
        let results = population
            .evaluate_generation(vec![Value(1.0), Value(2.0), Value(3.0)])
            .unwrap();
        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            let envelope = result.as_ref().expect("all items should return");
            assert_eq!(envelope.fitness(), Some((i + 1) as f64));
        }

        stop.store(true, Ordering::SeqCst);
        consumer.join().unwrap();
    }

    #[test]
    fn test_wait_factor_bounds_the_generation() {
        let broker: Arc<Broker<Value>> = Arc::new(Broker::new());
        let stop = Arc::new(AtomicBool::new(false));
        // Everything after the first item is delayed far beyond the grace
        // period.
        let consumer = echo_consumer(
            Arc::clone(&broker),
            Arc::clone(&stop),
            Some(Duration::from_secs(2)),
        );

        let mut population = BrokerPopulation::with_options(
            Arc::clone(&broker),
            PopulationOptions {
                wait_factor: 2,
                first_timeout: None,
            },
        );
        let started = Instant::now();
        let results = population
            .evaluate_generation(vec![Value(1.0), Value(2.0), Value(3.0), Value(4.0)])
            .unwrap();
        let elapsed = started.elapsed();

        let returned = results.iter().filter(|r| r.is_some()).count();
        assert!(returned < 4, "delayed items must not all return");
        assert!(results[0].is_some(), "the fast first item returns");
        // The grace period is a small multiple of the first-arrival latency,
        // far below the 2 s delay of the stragglers.
        assert!(elapsed < Duration::from_secs(2));

        stop.store(true, Ordering::SeqCst);
        consumer.join().unwrap();
    }

    #[test]
    fn test_first_timeout_without_consumer_errors() {
        let broker: Arc<Broker<Value>> = Arc::new(Broker::new());
        let mut population = BrokerPopulation::with_options(
            Arc::clone(&broker),
            PopulationOptions {
                wait_factor: 1,
                first_timeout: Some(Duration::from_millis(100)),
            },
        );
        let err = population
            .evaluate_generation(vec![Value(1.0)])
            .unwrap_err();
        assert!(matches!(err, GeneticError::GenerationTimeout(_)));
    }

    #[test]
    fn test_empty_generation_is_rejected() {
        let broker: Arc<Broker<Value>> = Arc::new(Broker::new());
        let mut population = BrokerPopulation::new(Arc::clone(&broker));
        assert!(matches!(
            population.evaluate_generation(Vec::new()),
            Err(GeneticError::EmptyPopulation)
        ));
    }

    #[test]
    fn test_stragglers_are_discarded_next_generation() {
        let broker: Arc<Broker<Value>> = Arc::new(Broker::new());
        let stop = Arc::new(AtomicBool::new(false));
        // First generation: second item delayed 800 ms so it arrives while
        // the *next* generation is collecting.
        let consumer = echo_consumer(
            Arc::clone(&broker),
            Arc::clone(&stop),
            Some(Duration::from_millis(800)),
        );

        let mut population = BrokerPopulation::with_options(
            Arc::clone(&broker),
            PopulationOptions {
                wait_factor: 1,
                first_timeout: None,
            },
        );
        let first = population
            .evaluate_generation(vec![Value(1.0), Value(2.0)])
            .unwrap();
        assert!(first[0].is_some());
        assert!(first[1].is_none(), "the delayed item misses its generation");

        // Second generation: the straggler from generation one arrives
        // mid-collection and must not be filed into these slots.
        let second = population
            .evaluate_generation(vec![Value(30.0), Value(40.0)])
            .unwrap();
        for result in second.iter().flatten() {
            let value = result.work().0;
            assert!(value == 30.0 || value == 40.0);
        }
        assert!(second[0].is_some());

        stop.store(true, Ordering::SeqCst);
        consumer.join().unwrap();
    }
}
