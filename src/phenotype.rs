//! # Phenotype Trait
//!
//! The `Phenotype` trait defines the interface for types that represent
//! individuals in an evolutionary algorithm. It provides methods for
//! crossover and mutation; mutation draws its randomness from a
//! [`FactoryRng`], so thousands of concurrent mutation operators share the
//! factory's pre-produced random stream instead of seeding generators of
//! their own.
//!
//! ## Example
//!
//! ```rust
//! use gendist::phenotype::Phenotype;
//! use gendist::random::FactoryRng;
//!
//! #[derive(Clone, Debug)]
//! struct Point {
//!     x: f64,
//! }
//!
//! impl Phenotype for Point {
//!     fn crossover(&mut self, other: &Self) {
//!         self.x = (self.x + other.x) / 2.0;
//!     }
//!
//!     fn mutate(&mut self, rng: &mut FactoryRng) {
//!         self.x += rng.uniform_range(-1.0, 1.0);
//!     }
//! }
//! ```

use std::fmt::Debug;

use crate::random::FactoryRng;

/// Trait for types that represent individuals in an evolutionary algorithm.
///
/// Types implementing this trait must also implement `Clone`, `Debug`,
/// `Send`, and `Sync` so that individuals can move freely between breeding,
/// the broker's buffers, and worker threads.
pub trait Phenotype: Clone + Debug + Send + Sync {
    /// Combines this individual's genetic material with `other`'s, in
    /// place.
    fn crossover(&mut self, other: &Self);

    /// Introduces random changes into this individual, drawing from the
    /// factory-backed random stream.
    fn mutate(&mut self, rng: &mut FactoryRng);
}
