//! # TCP Consumer (server side)
//!
//! The networked execution backend's server half. It listens on a TCP port
//! and runs one session thread per inbound connection: workers dial in, ask
//! for work with `ready`, and hand results back with `result`. Sessions are
//! fully independent: a hung or misbehaving worker stalls only its own
//! session and the single item it currently holds, never the broker or the
//! other sessions.
//!
//! Framing violations abort the offending session with a log entry; the
//! server itself keeps accepting connections until shut down.

use std::io;
use std::marker::PhantomData;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::broker::{Broker, Consumer, Envelope, WorkItem};
use crate::error::{GeneticError, Result};
use crate::net::{self, Command};

/// How long the acceptor sleeps between polls of the listening socket.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Per-session socket timeout; bounds how long a dead peer can pin its
/// session thread.
const SESSION_IO_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a session waits for the broker to offer work before answering
/// `nowork`.
const WORK_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// A consumer that serves work items to networked [`TcpWorker`] processes.
///
/// [`TcpWorker`]: crate::net::client::TcpWorker
pub struct TcpConsumer<W> {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    sessions: Arc<Mutex<Vec<JoinHandle<()>>>>,
    _marker: PhantomData<fn(W)>,
}

impl<W> TcpConsumer<W> {
    /// Binds the listening socket. Use port `0` to let the OS pick a free
    /// port and query it with [`local_addr`](Self::local_addr).
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener: Some(listener),
            local_addr,
            stop: Arc::new(AtomicBool::new(false)),
            acceptor: None,
            sessions: Arc::new(Mutex::new(Vec::new())),
            _marker: PhantomData,
        })
    }

    /// The address the server actually listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl<W> Consumer<W> for TcpConsumer<W>
where
    W: WorkItem + Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        "tcp-server"
    }

    fn start(&mut self, broker: Arc<Broker<W>>) -> Result<()> {
        let listener = self.listener.take().ok_or_else(|| {
            GeneticError::Configuration("TCP consumer started twice".to_string())
        })?;
        listener.set_nonblocking(true)?;

        let stop = Arc::clone(&self.stop);
        let sessions = Arc::clone(&self.sessions);
        let local_addr = self.local_addr;
        let acceptor = thread::Builder::new()
            .name("gendist-tcp-accept".to_string())
            .spawn(move || {
                debug!(%local_addr, "TCP consumer listening");
                while !stop.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            let broker = Arc::clone(&broker);
                            let stop = Arc::clone(&stop);
                            let handle = thread::Builder::new()
                                .name(format!("gendist-tcp-session-{}", peer))
                                .spawn(move || run_session(stream, peer, &broker, &stop))
                                .expect("failed to spawn session thread");
                            let mut sessions = sessions.lock().unwrap_or_else(|p| p.into_inner());
                            sessions.retain(|s| !s.is_finished());
                            sessions.push(handle);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL);
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            thread::sleep(ACCEPT_POLL);
                        }
                    }
                }
                debug!("TCP acceptor stopped");
            })
            .expect("failed to spawn acceptor thread");
        self.acceptor = Some(acceptor);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
            sessions.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl<W> Drop for TcpConsumer<W> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

/// Runs one client session to completion, logging how it ended.
fn run_session<W>(stream: TcpStream, peer: SocketAddr, broker: &Broker<W>, stop: &AtomicBool)
where
    W: WorkItem + Serialize + DeserializeOwned,
{
    debug!(%peer, "session started");
    match session_loop(stream, broker, stop) {
        Ok(()) => debug!(%peer, "session closed"),
        Err(GeneticError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            debug!(%peer, "client disconnected");
        }
        Err(e) => warn!(%peer, error = %e, "session aborted"),
    }
}

fn session_loop<W>(mut stream: TcpStream, broker: &Broker<W>, stop: &AtomicBool) -> Result<()>
where
    W: WorkItem + Serialize + DeserializeOwned,
{
    stream.set_read_timeout(Some(SESSION_IO_TIMEOUT))?;
    stream.set_write_timeout(Some(SESSION_IO_TIMEOUT))?;

    while !stop.load(Ordering::Relaxed) {
        let command = match net::read_command(&mut stream) {
            Ok(command) => command,
            // Idle connection: re-check the stop flag and keep waiting.
            Err(GeneticError::Io(e)) if is_timeout(&e) => continue,
            Err(e) => return Err(e),
        };
        match command {
            Command::Ready => match broker.poll_raw(WORK_POLL_TIMEOUT) {
                Some(envelope) => {
                    let payload = serde_json::to_vec(&envelope)?;
                    net::write_command(&mut stream, Command::Compute)?;
                    net::write_payload(&mut stream, &payload)?;
                }
                None => net::write_command(&mut stream, Command::NoWork)?,
            },
            Command::Result => {
                let payload = net::read_payload(&mut stream)?;
                let envelope: Envelope<W> = serde_json::from_slice(&payload)?;
                broker.put_processed(envelope);
            }
            Command::Close => return Ok(()),
            other => {
                return Err(GeneticError::Protocol(format!(
                    "unexpected command {:?} from client",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// Read/write timeouts surface as `WouldBlock` on Unix and `TimedOut` on
/// Windows.
fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
