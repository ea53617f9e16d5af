//! # ElitistSelection
//!
//! Keeps the best-scoring individuals, full stop. Elitism guarantees the
//! best solution found so far is never lost between generations, at the cost
//! of lower diversity than stochastic selection schemes.

use std::cmp::Ordering;

use crate::error::{GeneticError, Result};
use crate::evolution::EvolutionResult;
use crate::phenotype::Phenotype;
use crate::selection::SelectionStrategy;

/// Selects the top-scoring candidates.
#[derive(Debug, Clone, Default)]
pub struct ElitistSelection;

impl ElitistSelection {
    pub fn new() -> Self {
        Self
    }
}

impl<Pheno> SelectionStrategy<Pheno> for ElitistSelection
where
    Pheno: Phenotype,
{
    fn select(&self, candidates: &[EvolutionResult<Pheno>], count: usize) -> Result<Vec<Pheno>> {
        if candidates.is_empty() {
            return Err(GeneticError::EmptyPopulation);
        }
        let mut ranked: Vec<&EvolutionResult<Pheno>> = candidates.iter().collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(ranked
            .into_iter()
            .take(count.max(1))
            .map(|result| result.pheno.clone())
            .collect())
    }
}
