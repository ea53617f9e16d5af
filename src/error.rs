//! # Error Types
//!
//! This module defines the error types shared by the whole library. The
//! variants split into two families, and the split is deliberate: *misuse*
//! (bad configuration, submitting to an unregistered channel, instantiating a
//! second random number factory) is reported through [`GeneticError`], while
//! *timeouts* on blocking operations are ordinary values (`Option`, small
//! result types) returned by the timed operations themselves and never appear
//! here.
//!
//! ## Examples
//!
//! ```rust
//! use gendist::error::{GeneticError, Result};
//!
//! fn check_population(size: usize) -> Result<()> {
//!     if size == 0 {
//!         return Err(GeneticError::EmptyPopulation);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Adding context to a foreign error with [`ResultExt`]:
//!
//! ```rust
//! use gendist::error::{Result, ResultExt};
//!
//! fn parse_port(raw: &str) -> Result<u16> {
//!     raw.parse::<u16>().context("invalid port number")
//! }
//! ```

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

use crate::broker::ChannelId;

/// Represents errors that can occur in the library.
///
/// Timed-out waits are *not* errors; every blocking primitive has a timed
/// variant whose return value expresses the timeout directly.
#[derive(Error, Debug)]
pub enum GeneticError {
    /// An invalid configuration was provided, or a guarded single-instance
    /// component was instantiated twice.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A work item was submitted to, or requested from, a channel id that is
    /// not currently registered with the broker.
    #[error("Channel {0} is not registered with the broker")]
    ChannelNotRegistered(ChannelId),

    /// A generation finished without a single evaluated individual returning
    /// within the configured first-result timeout.
    #[error("Generation timed out: {0}")]
    GenerationTimeout(String),

    /// Error that occurs when a breeding operation fails.
    #[error("Breeding error: {0}")]
    Breeding(String),

    /// Error that occurs when a fitness calculation produces an unusable
    /// value.
    #[error("Fitness calculation error: {0}")]
    FitnessCalculation(String),

    /// Error that occurs when an empty population is encountered.
    #[error("Empty population error: Cannot operate on an empty population")]
    EmptyPopulation,

    /// The remote peer violated the wire protocol (bad command token,
    /// unparsable size header). Fatal for the affected session only.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A work item payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error that occurs when an I/O operation fails.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic error with a custom message.
    #[error("{0}")]
    Other(String),
}

/// A specialized Result type for library operations.
///
/// This type is a convenience wrapper around `std::result::Result` with the
/// error type fixed to `GeneticError`.
pub type Result<T> = std::result::Result<T, GeneticError>;

/// Extension trait for `Result` to add context when converting foreign errors
/// into [`GeneticError`].
///
/// ## Examples
///
/// ```rust
/// use gendist::error::ResultExt;
/// use std::fs::File;
///
/// fn open_log(path: &str) -> gendist::error::Result<File> {
///     File::open(path).context("failed to open log file")
/// }
/// ```
pub trait ResultExt<T, E> {
    /// Converts the error to a [`GeneticError::Other`] carrying `context`
    /// and the original error message.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| GeneticError::Other(format!("{}: {}", context, e)))
    }
}
