//! # Thread-Pool Consumer
//!
//! The in-process execution backend: a fixed-size group of named worker
//! threads, each looping over "pull one raw item from the broker, evaluate
//! it, push the result back". Every worker owns its own [`FactoryRng`]
//! front-end, so evaluation randomness never contends on a lock.
//!
//! Shutdown is cooperative: workers check their stop flag between items, so
//! an in-flight evaluation always runs to completion before the thread is
//! joined.

use std::marker::PhantomData;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::broker::{Broker, Consumer, WorkItem};
use crate::error::{GeneticError, Result};
use crate::random::RandomFactory;

/// How long a worker waits for work before re-checking its stop flag.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// An in-process consumer evaluating work items on a fixed worker group.
pub struct ThreadPoolConsumer<W> {
    threads: usize,
    factory: Arc<RandomFactory>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    _marker: PhantomData<fn(W)>,
}

impl<W: WorkItem> ThreadPoolConsumer<W> {
    /// Creates a consumer with `threads` workers drawing randomness from
    /// `factory`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `threads` is zero.
    pub fn new(threads: usize, factory: Arc<RandomFactory>) -> Result<Self> {
        if threads == 0 {
            return Err(GeneticError::Configuration(
                "thread pool consumer needs at least one worker".to_string(),
            ));
        }
        Ok(Self {
            threads,
            factory,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            _marker: PhantomData,
        })
    }

    /// The configured number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl<W: WorkItem> Consumer<W> for ThreadPoolConsumer<W> {
    fn name(&self) -> &str {
        "thread-pool"
    }

    fn start(&mut self, broker: Arc<Broker<W>>) -> Result<()> {
        for index in 0..self.threads {
            let broker = Arc::clone(&broker);
            let factory = Arc::clone(&self.factory);
            let stop = Arc::clone(&self.stop);
            let handle = thread::Builder::new()
                .name(format!("gendist-worker-{}", index))
                .spawn(move || {
                    let mut rng = factory.rng();
                    while !stop.load(Ordering::Relaxed) {
                        let Some(mut envelope) = broker.poll_raw(POLL_TIMEOUT) else {
                            continue;
                        };
                        let fitness = envelope.work_mut().process(&mut rng);
                        envelope.set_fitness(fitness);
                        broker.put_processed(envelope);
                    }
                    debug!(worker = index, "thread pool worker stopped");
                })
                .expect("failed to spawn thread pool worker");
            self.workers.push(handle);
        }
        debug!(threads = self.threads, "thread pool consumer started");
        Ok(())
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                // A panicking evaluation poisons nothing in the broker, but
                // the worker state is gone; treat it like any other broken
                // concurrency primitive.
                eprintln!("gendist: thread pool worker panicked, terminating");
                process::abort();
            }
        }
    }
}

impl<W> Drop for ThreadPoolConsumer<W> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
