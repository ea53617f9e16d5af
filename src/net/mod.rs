//! # Wire Protocol
//!
//! Framing shared by the TCP consumer (server side) and the networked worker
//! (client side). Every transmission starts with a fixed-width command
//! header of [`COMMAND_LEN`] bytes (an ASCII token padded with spaces), so
//! both ends agree on framing without negotiating lengths. Transfers that
//! carry data append a second fixed-width header holding the payload size in
//! decimal, followed by the payload bytes themselves. The payload is an
//! opaque serialized [`Envelope`](crate::broker::Envelope); this module never
//! looks inside it.
//!
//! Recognized commands:
//!
//! | token     | direction        | meaning                                |
//! |-----------|------------------|----------------------------------------|
//! | `ready`   | worker → server  | request one work item                  |
//! | `compute` | server → worker  | here is an item (payload follows)      |
//! | `nowork`  | server → worker  | nothing available right now            |
//! | `result`  | worker → server  | processed item follows (payload)       |
//! | `close`   | either           | end the session                        |

pub mod client;
pub mod server;

pub use client::{TcpWorker, WorkerOptions, WorkerReport};
pub use server::TcpConsumer;

use std::io::{Read, Write};

use crate::error::{GeneticError, Result};

/// Width of every fixed-size header on the wire.
pub const COMMAND_LEN: usize = 64;

/// Upper bound on a single payload; anything larger is a framing error.
pub const MAX_PAYLOAD: usize = 256 * 1024 * 1024;

/// The commands exchanged between server and worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Worker requests one work item.
    Ready,
    /// Server delivers a work item; a payload follows.
    Compute,
    /// Server has no work to offer.
    NoWork,
    /// Worker returns a processed item; a payload follows.
    Result,
    /// Either side ends the session.
    Close,
}

impl Command {
    /// The wire token for this command.
    pub fn token(self) -> &'static str {
        match self {
            Command::Ready => "ready",
            Command::Compute => "compute",
            Command::NoWork => "nowork",
            Command::Result => "result",
            Command::Close => "close",
        }
    }

    /// Parses a trimmed wire token.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "ready" => Some(Command::Ready),
            "compute" => Some(Command::Compute),
            "nowork" => Some(Command::NoWork),
            "result" => Some(Command::Result),
            "close" => Some(Command::Close),
            _ => None,
        }
    }
}

/// Pads `token` into a [`COMMAND_LEN`]-byte header.
fn assemble_header(token: &str) -> [u8; COMMAND_LEN] {
    debug_assert!(token.len() <= COMMAND_LEN);
    let mut header = [b' '; COMMAND_LEN];
    header[..token.len()].copy_from_slice(token.as_bytes());
    header
}

/// Writes a bare command header.
pub fn write_command<S: Write>(stream: &mut S, command: Command) -> Result<()> {
    stream.write_all(&assemble_header(command.token()))?;
    stream.flush()?;
    Ok(())
}

/// Reads one command header.
///
/// # Errors
///
/// I/O failures surface as [`GeneticError::Io`]; an unrecognized token is a
/// [`GeneticError::Protocol`] error and should abort the session.
pub fn read_command<S: Read>(stream: &mut S) -> Result<Command> {
    let token = read_header(stream)?;
    Command::parse(&token)
        .ok_or_else(|| GeneticError::Protocol(format!("unknown command token {:?}", token)))
}

/// Writes a size header followed by the payload bytes.
pub fn write_payload<S: Write>(stream: &mut S, payload: &[u8]) -> Result<()> {
    stream.write_all(&assemble_header(&payload.len().to_string()))?;
    stream.write_all(payload)?;
    stream.flush()?;
    Ok(())
}

/// Reads a size header followed by that many payload bytes.
pub fn read_payload<S: Read>(stream: &mut S) -> Result<Vec<u8>> {
    let header = read_header(stream)?;
    let size: usize = header
        .parse()
        .map_err(|_| GeneticError::Protocol(format!("unparsable size header {:?}", header)))?;
    if size > MAX_PAYLOAD {
        return Err(GeneticError::Protocol(format!(
            "payload of {} bytes exceeds the {} byte limit",
            size, MAX_PAYLOAD
        )));
    }
    let mut payload = vec![0u8; size];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

/// Reads one fixed-width header and trims the padding.
fn read_header<S: Read>(stream: &mut S) -> Result<String> {
    let mut raw = [0u8; COMMAND_LEN];
    stream.read_exact(&mut raw)?;
    Ok(String::from_utf8_lossy(&raw).trim().to_string())
}
