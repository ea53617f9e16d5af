//! # BreedStrategy
//!
//! The `BreedStrategy` trait defines the interface for strategies
//! responsible for breeding new individuals (phenotypes) from a set of
//! parent individuals and evolution options. Mutation randomness comes from
//! the factory-backed [`FactoryRng`](crate::random::FactoryRng) handed in by
//! the caller.

pub mod ordinary;

pub use ordinary::OrdinaryStrategy;

use std::fmt::Debug;

use crate::{
    error::Result, evolution::EvolutionOptions, phenotype::Phenotype, random::FactoryRng,
};

/// Breeds new individuals from a set of parents.
pub trait BreedStrategy<Pheno: Phenotype>
where
    Self: Debug + Send + Sync,
{
    /// Breeds new individuals based on a set of parent individuals and
    /// evolution options.
    ///
    /// ## Parameters
    ///
    /// - `parents`: A slice containing the parent individuals.
    /// - `evol_options`: A reference to the evolution options specifying
    ///   algorithm parameters.
    /// - `rng`: The random number front-end used during breeding.
    ///
    /// ## Errors
    ///
    /// Fails when `parents` is empty or the breeding process cannot
    /// produce offspring.
    fn breed(
        &self,
        parents: &[Pheno],
        evol_options: &EvolutionOptions,
        rng: &mut FactoryRng,
    ) -> Result<Vec<Pheno>>;
}
