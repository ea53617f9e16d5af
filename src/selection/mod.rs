//! # SelectionStrategy
//!
//! The `SelectionStrategy` trait defines how the parents of the next
//! generation are chosen from the scored results of the current one.

pub mod elitist;

pub use elitist::ElitistSelection;

use std::fmt::Debug;

use crate::error::Result;
use crate::evolution::EvolutionResult;
use crate::phenotype::Phenotype;

/// Chooses the parents of the next generation.
pub trait SelectionStrategy<Pheno: Phenotype>
where
    Self: Debug + Send + Sync,
{
    /// Selects up to `count` parents from `candidates`.
    ///
    /// ## Errors
    ///
    /// Fails on an empty candidate set.
    fn select(&self, candidates: &[EvolutionResult<Pheno>], count: usize) -> Result<Vec<Pheno>>;
}
