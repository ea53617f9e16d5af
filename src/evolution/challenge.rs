//! # Challenge
//!
//! A `Challenge` scores phenotypes: higher scores are better. Challenges
//! travel with their phenotypes when evaluation is brokered out to remote
//! workers, so implementations that should work over the network also derive
//! `Serialize`/`Deserialize`.

use crate::phenotype::Phenotype;

/// Scores phenotypes; higher is better.
pub trait Challenge<Pheno: Phenotype>: Send + Sync {
    /// Calculates the fitness of `phenotype`.
    fn score(&self, phenotype: &Pheno) -> f64;
}
