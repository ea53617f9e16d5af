//! # EvolutionLauncher
//!
//! Manages the evolution process: each generation it breeds candidates with
//! the configured [`BreedStrategy`], scores them through the configured
//! [`Evaluator`] (serially, in parallel, or via the broker), and selects the
//! parents of the next generation with the configured [`SelectionStrategy`].
//!
//! A brokered evaluator may return fewer individuals than were bred; the
//! launcher simply selects from whatever came back, so a run keeps making
//! progress even when remote workers disappear mid-generation.

use std::cmp::Ordering;
use std::marker::PhantomData;

use tracing::debug;

use crate::error::{GeneticError, Result};
use crate::evolution::evaluator::Evaluator;
use crate::evolution::options::EvolutionOptions;
use crate::phenotype::Phenotype;
use crate::random::FactoryRng;
use crate::selection::SelectionStrategy;
use crate::strategy::BreedStrategy;

/// Represents the result of an evolution, containing a phenotype and its
/// associated score.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct EvolutionResult<Pheno: Phenotype> {
    /// The evolved phenotype.
    pub pheno: Pheno,
    /// The fitness score of the phenotype.
    pub score: f64,
}

/// Manages the evolution process using a breeding strategy, a selection
/// strategy, and an evaluator.
pub struct EvolutionLauncher<Pheno, Strategy, Selection, Eval>
where
    Pheno: Phenotype,
    Strategy: BreedStrategy<Pheno>,
    Selection: SelectionStrategy<Pheno>,
    Eval: Evaluator<Pheno>,
{
    strategy: Strategy,
    selection: Selection,
    evaluator: Eval,
    _marker: PhantomData<Pheno>,
}

impl<Pheno, Strategy, Selection, Eval> EvolutionLauncher<Pheno, Strategy, Selection, Eval>
where
    Pheno: Phenotype,
    Strategy: BreedStrategy<Pheno>,
    Selection: SelectionStrategy<Pheno>,
    Eval: Evaluator<Pheno>,
{
    /// Creates a new launcher from its three collaborators.
    pub fn new(strategy: Strategy, selection: Selection, evaluator: Eval) -> Self {
        Self {
            strategy,
            selection,
            evaluator,
            _marker: PhantomData,
        }
    }

    /// Evolves a population over multiple generations, starting from a
    /// single seed individual.
    ///
    /// # Errors
    ///
    /// This method will return an error if:
    /// - The population size or offspring count in `options` is zero
    /// - Breeding fails
    /// - A fitness score is non-finite
    /// - A generation comes back empty (e.g. every brokered individual was
    ///   lost)
    pub fn evolve(
        &mut self,
        options: &EvolutionOptions,
        starting_value: Pheno,
        rng: &mut FactoryRng,
    ) -> Result<EvolutionResult<Pheno>> {
        if options.get_population_size() == 0 {
            return Err(GeneticError::Configuration(
                "Population size cannot be zero".to_string(),
            ));
        }
        if options.get_num_offspring() == 0 {
            return Err(GeneticError::Configuration(
                "Number of offspring cannot be zero".to_string(),
            ));
        }

        let mut parents: Vec<Pheno> = vec![starting_value];
        let mut best: Option<EvolutionResult<Pheno>> = None;

        for generation in 0..options.get_num_generations() {
            let candidates = self.strategy.breed(&parents, options, rng).map_err(|e| {
                GeneticError::Breeding(format!(
                    "Failed to breed candidates in generation {}: {}",
                    generation, e
                ))
            })?;

            let scored = self.evaluator.evaluate(candidates)?;
            if scored.is_empty() {
                return Err(GeneticError::EmptyPopulation);
            }

            if let Some(generation_best) = scored
                .iter()
                .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
            {
                let improved = best
                    .as_ref()
                    .map(|b| generation_best.score > b.score)
                    .unwrap_or(true);
                if improved {
                    best = Some(generation_best.clone());
                }
                debug!(
                    generation,
                    evaluated = scored.len(),
                    best_score = generation_best.score,
                    "generation complete"
                );
            }

            parents = self
                .selection
                .select(&scored, options.get_population_size())?;
        }

        best.ok_or(GeneticError::EmptyPopulation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::evaluator::SerialEvaluator;
    use crate::evolution::Challenge;
    use crate::random::factory;
    use crate::selection::ElitistSelection;
    use crate::strategy::OrdinaryStrategy;

    #[derive(Debug, Clone)]
    struct XCoordinate {
        x: f64,
    }

    impl Phenotype for XCoordinate {
        fn crossover(&mut self, other: &Self) {
            self.x = (self.x + other.x) / 2.0;
        }

        fn mutate(&mut self, rng: &mut FactoryRng) {
            self.x += rng.uniform_range(-1.0, 1.0);
        }
    }

    #[derive(Debug, Clone)]
    struct TargetChallenge {
        target: f64,
    }

    impl Challenge<XCoordinate> for TargetChallenge {
        fn score(&self, phenotype: &XCoordinate) -> f64 {
            let delta = phenotype.x - self.target;
            1.0 / (delta * delta + 1e-9)
        }
    }

    #[test]
    fn test_evolution_approaches_the_target() {
        let factory = factory::global().unwrap();
        let mut rng = factory.rng();
        let options = EvolutionOptions::new(60, 10, 30);
        let mut launcher = EvolutionLauncher::new(
            OrdinaryStrategy::new(),
            ElitistSelection::new(),
            SerialEvaluator::new(TargetChallenge { target: 2.0 }),
        );
        let winner = launcher
            .evolve(&options, XCoordinate { x: 10.0 }, &mut rng)
            .unwrap();
        assert!((winner.pheno.x - 2.0).abs() < 0.5);
    }

    #[test]
    fn test_zero_population_size_is_rejected() {
        let factory = factory::global().unwrap();
        let mut rng = factory.rng();
        let options = EvolutionOptions::new(10, 0, 10);
        let mut launcher = EvolutionLauncher::new(
            OrdinaryStrategy::new(),
            ElitistSelection::new(),
            SerialEvaluator::new(TargetChallenge { target: 2.0 }),
        );
        assert!(launcher
            .evolve(&options, XCoordinate { x: 0.0 }, &mut rng)
            .is_err());
    }

    #[test]
    fn test_zero_offspring_is_rejected() {
        let factory = factory::global().unwrap();
        let mut rng = factory.rng();
        let options = EvolutionOptions::new(10, 5, 0);
        let mut launcher = EvolutionLauncher::new(
            OrdinaryStrategy::new(),
            ElitistSelection::new(),
            SerialEvaluator::new(TargetChallenge { target: 2.0 }),
        );
        assert!(launcher
            .evolve(&options, XCoordinate { x: 0.0 }, &mut rng)
            .is_err());
    }
}
