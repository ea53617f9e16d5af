//! # EvolutionOptions
//!
//! The `EvolutionOptions` struct represents the configuration options for an
//! evolutionary run: the number of generations, the population size carried
//! between generations, the number of offspring bred per generation, and the
//! threshold above which breeding mutates offspring in parallel.

use serde::{Deserialize, Serialize};

/// Configuration options for an evolutionary run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionOptions {
    num_generations: usize,
    population_size: usize,
    num_offspring: usize,
    /// Minimum number of offspring to mutate in parallel.
    parallel_threshold: usize,
}

impl EvolutionOptions {
    /// Creates options with the given parameters and the default parallel
    /// threshold.
    pub fn new(num_generations: usize, population_size: usize, num_offspring: usize) -> Self {
        Self {
            num_generations,
            population_size,
            num_offspring,
            parallel_threshold: 1000,
        }
    }

    /// Creates options with all parameters specified.
    ///
    /// # Arguments
    ///
    /// * `num_generations` - The number of generations to run.
    /// * `population_size` - The number of parents carried per generation.
    /// * `num_offspring` - The number of offspring bred per generation.
    /// * `parallel_threshold` - The minimum number of offspring to mutate in
    ///   parallel.
    pub fn new_with_threshold(
        num_generations: usize,
        population_size: usize,
        num_offspring: usize,
        parallel_threshold: usize,
    ) -> Self {
        Self {
            num_generations,
            population_size,
            num_offspring,
            parallel_threshold,
        }
    }

    pub fn get_num_generations(&self) -> usize {
        self.num_generations
    }

    pub fn get_population_size(&self) -> usize {
        self.population_size
    }

    pub fn get_num_offspring(&self) -> usize {
        self.num_offspring
    }

    pub fn get_parallel_threshold(&self) -> usize {
        self.parallel_threshold
    }

    pub fn set_num_generations(&mut self, num_generations: usize) {
        self.num_generations = num_generations;
    }

    pub fn set_population_size(&mut self, population_size: usize) {
        self.population_size = population_size;
    }

    pub fn set_num_offspring(&mut self, num_offspring: usize) {
        self.num_offspring = num_offspring;
    }

    pub fn set_parallel_threshold(&mut self, parallel_threshold: usize) {
        self.parallel_threshold = parallel_threshold;
    }
}

impl Default for EvolutionOptions {
    fn default() -> Self {
        Self {
            num_generations: 100,
            population_size: 20,
            num_offspring: 20,
            parallel_threshold: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_usable() {
        let options = EvolutionOptions::default();
        assert!(options.get_num_generations() > 0);
        assert!(options.get_population_size() > 0);
        assert!(options.get_num_offspring() > 0);
    }

    #[test]
    fn test_setters() {
        let mut options = EvolutionOptions::new(10, 5, 8);
        options.set_parallel_threshold(64);
        assert_eq!(options.get_num_generations(), 10);
        assert_eq!(options.get_population_size(), 5);
        assert_eq!(options.get_num_offspring(), 8);
        assert_eq!(options.get_parallel_threshold(), 64);
    }
}
