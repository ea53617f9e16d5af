//! # OrdinaryStrategy
//!
//! The `OrdinaryStrategy` struct represents a basic breeding strategy where
//! the first parent is considered the winner of the previous generation: the
//! winner survives unchanged, crossover children are bred against the
//! remaining parents, and the generation is filled up with mutated copies of
//! the winner.
//!
//! Above the configured parallel threshold, mutation fans out over rayon
//! with one factory-backed random front-end per worker thread, so large
//! generations never serialize on a single generator.

use std::cell::RefCell;

use rayon::prelude::*;
use thread_local::ThreadLocal;

use crate::error::{GeneticError, Result};
use crate::evolution::EvolutionOptions;
use crate::phenotype::Phenotype;
use crate::random::FactoryRng;
use crate::strategy::BreedStrategy;

/// A basic winner-plus-offspring breeding strategy.
#[derive(Debug, Clone, Default)]
pub struct OrdinaryStrategy;

impl OrdinaryStrategy {
    /// Creates a new `OrdinaryStrategy` instance.
    pub fn new() -> Self {
        Self
    }
}

impl<Pheno> BreedStrategy<Pheno> for OrdinaryStrategy
where
    Pheno: Phenotype,
{
    fn breed(
        &self,
        parents: &[Pheno],
        evol_options: &EvolutionOptions,
        rng: &mut FactoryRng,
    ) -> Result<Vec<Pheno>> {
        let winner = parents
            .first()
            .ok_or_else(|| GeneticError::Breeding("no parents to breed from".to_string()))?;

        let mut children = Vec::with_capacity(evol_options.get_num_offspring().max(parents.len()));
        // Slot zero is the unmodified winner of the previous generation.
        children.push(winner.clone());

        for parent in parents.iter().skip(1) {
            let mut child = winner.clone();
            child.crossover(parent);
            children.push(child);
        }
        while children.len() < evol_options.get_num_offspring() {
            children.push(winner.clone());
        }

        let offspring = &mut children[1..];
        if offspring.len() >= evol_options.get_parallel_threshold() {
            let factory = rng.factory().clone();
            let local_rng: ThreadLocal<RefCell<FactoryRng>> = ThreadLocal::new();
            offspring.par_iter_mut().for_each(|child| {
                let mut rng = local_rng
                    .get_or(|| RefCell::new(FactoryRng::new(factory.clone())))
                    .borrow_mut();
                child.mutate(&mut rng);
            });
        } else {
            for child in offspring {
                child.mutate(rng);
            }
        }

        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::factory;

    #[derive(Debug, Clone, PartialEq)]
    struct Number(f64);

    impl Phenotype for Number {
        fn crossover(&mut self, other: &Self) {
            self.0 = (self.0 + other.0) / 2.0;
        }

        fn mutate(&mut self, rng: &mut FactoryRng) {
            self.0 += rng.uniform_range(-0.5, 0.5);
        }
    }

    #[test]
    fn test_breeds_the_requested_number_of_offspring() {
        let factory = factory::global().unwrap();
        let mut rng = factory.rng();
        let options = EvolutionOptions::new(1, 4, 12);
        let children = OrdinaryStrategy::new()
            .breed(&[Number(1.0), Number(3.0)], &options, &mut rng)
            .unwrap();
        assert_eq!(children.len(), 12);
    }

    #[test]
    fn test_winner_survives_unchanged() {
        let factory = factory::global().unwrap();
        let mut rng = factory.rng();
        let options = EvolutionOptions::new(1, 4, 6);
        let children = OrdinaryStrategy::new()
            .breed(&[Number(7.0), Number(1.0)], &options, &mut rng)
            .unwrap();
        assert_eq!(children[0], Number(7.0));
    }

    #[test]
    fn test_parallel_mutation_path() {
        let factory = factory::global().unwrap();
        let mut rng = factory.rng();
        // Threshold of 1 forces the rayon path even for small generations.
        let options = EvolutionOptions::new_with_threshold(1, 4, 64, 1);
        let children = OrdinaryStrategy::new()
            .breed(&[Number(0.0)], &options, &mut rng)
            .unwrap();
        assert_eq!(children.len(), 64);
        // The winner is untouched, the offspring are mutated copies.
        assert_eq!(children[0], Number(0.0));
        assert!(children[1..].iter().any(|c| *c != Number(0.0)));
    }

    #[test]
    fn test_empty_parents_fail() {
        let factory = factory::global().unwrap();
        let mut rng = factory.rng();
        let options = EvolutionOptions::default();
        assert!(OrdinaryStrategy::new()
            .breed(&[] as &[Number], &options, &mut rng)
            .is_err());
    }
}
