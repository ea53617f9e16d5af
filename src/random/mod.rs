//! # Randomness Services
//!
//! Everything an evolutionary run needs to draw randomness at scale:
//!
//! - [`seed::SeedManager`]: decorrelated start seeds for independent
//!   generator streams,
//! - [`packet::RandomPacket`]: bulk-produced arrays of uniform `[0, 1)`
//!   numbers,
//! - [`factory::RandomFactory`]: the producer-thread pool serving packets to
//!   any number of [`factory::FactoryRng`] front-ends.
//!
//! Mutation operators receive a `&mut FactoryRng` and never touch a shared
//! generator, so the random-number hot path carries no lock.

pub mod factory;
pub mod packet;
pub mod seed;

pub use factory::{global, FactoryOptions, FactoryRng, RandomFactory};
pub use packet::{RandomPacket, DEFAULT_PACKET_SIZE};
pub use seed::{SeedManager, DEFAULT_MIN_UNIQUE_SEEDS, DEFAULT_START_SEED};
