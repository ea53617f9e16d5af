//! # TCP Worker (networked client)
//!
//! The client half of the networked execution backend: a worker process
//! connects to a [`TcpConsumer`](crate::net::server::TcpConsumer), then loops
//! "request work, evaluate locally, submit the result". Evaluation draws its
//! randomness from the worker's own [`FactoryRng`], so remote mutation and
//! stochastic fitness functions behave exactly as they do in-process.
//!
//! Two bounds keep a worker from spinning forever against a dead or idle
//! server: `max_connection_attempts` caps consecutive failed connects, and
//! `max_stalls` caps consecutive `nowork` answers, after which the run loop
//! ends cleanly. Protocol violations are fatal for the worker, never for
//! the server.

use std::io;
use std::marker::PhantomData;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::{Envelope, WorkItem};
use crate::error::{GeneticError, Result};
use crate::net::{self, Command};
use crate::random::{FactoryRng, RandomFactory};

/// Configuration for a [`TcpWorker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// Maximum number of consecutive `nowork` answers before the worker
    /// gives up; `0` means unlimited.
    pub max_stalls: u32,
    /// Maximum number of consecutive failed connection attempts before the
    /// worker gives up; `0` means unlimited.
    pub max_connection_attempts: u32,
    /// Pause between failed connection attempts.
    pub retry_delay: Duration,
    /// Pause after a `nowork` answer before asking again.
    pub stall_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_stalls: 10,
            max_connection_attempts: 10,
            retry_delay: Duration::from_millis(500),
            stall_delay: Duration::from_millis(50),
        }
    }
}

/// What a worker accomplished before its run loop ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Number of work items processed and submitted back.
    pub processed: u64,
    /// Consecutive no-work answers seen when the loop ended.
    pub stalls: u32,
}

/// A networked worker process evaluating items served by a remote broker.
pub struct TcpWorker<W> {
    addr: String,
    options: WorkerOptions,
    factory: Arc<RandomFactory>,
    _marker: PhantomData<fn(W)>,
}

impl<W> TcpWorker<W>
where
    W: WorkItem + Serialize + DeserializeOwned,
{
    /// Creates a worker that will connect to `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, options: WorkerOptions, factory: Arc<RandomFactory>) -> Self {
        Self {
            addr: addr.into(),
            options,
            factory,
            _marker: PhantomData,
        }
    }

    /// The server address this worker connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Runs the evaluate-and-return loop until a stop condition is reached.
    ///
    /// Returns cleanly when the stall bound is hit or the server closes the
    /// session.
    ///
    /// # Errors
    ///
    /// Connection failures beyond `max_connection_attempts`, and protocol
    /// violations by the server.
    pub fn run(&self) -> Result<WorkerReport> {
        let mut rng = FactoryRng::new(Arc::clone(&self.factory));
        let mut report = WorkerReport::default();
        let mut stalls: u32 = 0;

        'connection: loop {
            let mut stream = self.connect()?;
            debug!(addr = %self.addr, "worker connected");

            loop {
                if let Err(e) = net::write_command(&mut stream, Command::Ready) {
                    warn!(error = %e, "lost connection while requesting work, reconnecting");
                    continue 'connection;
                }
                let command = match net::read_command(&mut stream) {
                    Ok(command) => command,
                    Err(GeneticError::Io(e)) => {
                        warn!(error = %e, "lost connection while awaiting work, reconnecting");
                        continue 'connection;
                    }
                    Err(e) => return Err(e),
                };
                match command {
                    Command::Compute => {
                        let payload = net::read_payload(&mut stream)?;
                        let mut envelope: Envelope<W> = serde_json::from_slice(&payload)?;
                        let fitness = envelope.work_mut().process(&mut rng);
                        envelope.set_fitness(fitness);
                        let answer = serde_json::to_vec(&envelope)?;
                        if let Err(e) = net::write_command(&mut stream, Command::Result)
                            .and_then(|()| net::write_payload(&mut stream, &answer))
                        {
                            warn!(error = %e, "lost connection while returning a result, reconnecting");
                            continue 'connection;
                        }
                        report.processed += 1;
                        stalls = 0;
                    }
                    Command::NoWork => {
                        stalls += 1;
                        if self.options.max_stalls != 0 && stalls >= self.options.max_stalls {
                            debug!(stalls, "stall bound reached, worker leaving");
                            report.stalls = stalls;
                            return Ok(report);
                        }
                        thread::sleep(self.options.stall_delay);
                    }
                    Command::Close => {
                        debug!("server closed the session");
                        report.stalls = stalls;
                        return Ok(report);
                    }
                    other => {
                        return Err(GeneticError::Protocol(format!(
                            "unexpected command {:?} from server",
                            other
                        )))
                    }
                }
            }
        }
    }

    /// Connects with bounded retry; the attempt budget applies to
    /// *consecutive* failures.
    fn connect(&self) -> Result<TcpStream> {
        let mut attempts: u32 = 0;
        loop {
            match TcpStream::connect(&self.addr) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => {
                    attempts += 1;
                    if self.options.max_connection_attempts != 0
                        && attempts >= self.options.max_connection_attempts
                    {
                        warn!(addr = %self.addr, attempts, "could not connect, giving up");
                        return Err(GeneticError::Io(io::Error::new(
                            e.kind(),
                            format!(
                                "giving up on {} after {} connection attempts: {}",
                                self.addr, attempts, e
                            ),
                        )));
                    }
                    thread::sleep(self.options.retry_delay);
                }
            }
        }
    }
}
