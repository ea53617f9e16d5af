//! # Evaluators
//!
//! An [`Evaluator`] turns a generation of bred candidates into scored
//! results. Three implementations cover the execution spectrum:
//!
//! - [`SerialEvaluator`] scores in place on the calling thread,
//! - [`ParallelEvaluator`] fans scoring out over rayon above a threshold,
//! - [`BrokerEvaluator`] submits the generation to a broker channel, where
//!   any enrolled consumer (in-process thread pool or networked workers)
//!   picks it up. Individuals that never return within the wait-factor bound
//!   are dropped from the generation.
//!
//! The brokered path wraps each phenotype together with its challenge into
//! an [`Evaluation`] work item, so the scoring logic travels with the data
//! to wherever the evaluation runs.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::broker::{Broker, WorkItem};
use crate::error::{GeneticError, Result};
use crate::evolution::challenge::Challenge;
use crate::evolution::launcher::EvolutionResult;
use crate::phenotype::Phenotype;
use crate::population::{BrokerPopulation, PopulationOptions};
use crate::random::FactoryRng;

/// Scores a generation of candidates.
pub trait Evaluator<Pheno: Phenotype> {
    /// Evaluates `candidates`, returning the scored subset that completed.
    ///
    /// Implementations may drop individuals (a brokered evaluation drops
    /// those that never return); dropping *all* of them is an error the
    /// caller sees as an empty generation.
    fn evaluate(&mut self, candidates: Vec<Pheno>) -> Result<Vec<EvolutionResult<Pheno>>>;
}

/// A phenotype bundled with its challenge: the unit of work a consumer
/// processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation<Pheno, Chall> {
    /// The individual under evaluation.
    pub phenotype: Pheno,
    /// The scoring logic, carried along so remote workers can apply it.
    pub challenge: Chall,
}

impl<Pheno, Chall> WorkItem for Evaluation<Pheno, Chall>
where
    Pheno: Phenotype + 'static,
    Chall: Challenge<Pheno> + Send + 'static,
{
    fn process(&mut self, _rng: &mut FactoryRng) -> f64 {
        self.challenge.score(&self.phenotype)
    }
}

fn ensure_finite(score: f64) -> Result<f64> {
    if score.is_finite() {
        Ok(score)
    } else {
        Err(GeneticError::FitnessCalculation(format!(
            "Non-finite fitness score encountered: {}",
            score
        )))
    }
}

/// Scores candidates sequentially on the calling thread.
#[derive(Debug, Clone)]
pub struct SerialEvaluator<Chall> {
    challenge: Chall,
}

impl<Chall> SerialEvaluator<Chall> {
    pub fn new(challenge: Chall) -> Self {
        Self { challenge }
    }
}

impl<Pheno, Chall> Evaluator<Pheno> for SerialEvaluator<Chall>
where
    Pheno: Phenotype,
    Chall: Challenge<Pheno>,
{
    fn evaluate(&mut self, candidates: Vec<Pheno>) -> Result<Vec<EvolutionResult<Pheno>>> {
        candidates
            .into_iter()
            .map(|pheno| {
                let score = ensure_finite(self.challenge.score(&pheno))?;
                Ok(EvolutionResult { pheno, score })
            })
            .collect()
    }
}

/// Scores candidates with rayon once the generation is large enough for
/// parallelism to pay off.
#[derive(Debug, Clone)]
pub struct ParallelEvaluator<Chall> {
    challenge: Chall,
    parallel_threshold: usize,
}

impl<Chall> ParallelEvaluator<Chall> {
    /// Creates an evaluator that goes parallel at `parallel_threshold`
    /// candidates.
    pub fn new(challenge: Chall, parallel_threshold: usize) -> Self {
        Self {
            challenge,
            parallel_threshold,
        }
    }
}

impl<Pheno, Chall> Evaluator<Pheno> for ParallelEvaluator<Chall>
where
    Pheno: Phenotype,
    Chall: Challenge<Pheno>,
{
    fn evaluate(&mut self, candidates: Vec<Pheno>) -> Result<Vec<EvolutionResult<Pheno>>> {
        if candidates.len() < self.parallel_threshold {
            return candidates
                .into_iter()
                .map(|pheno| {
                    let score = ensure_finite(self.challenge.score(&pheno))?;
                    Ok(EvolutionResult { pheno, score })
                })
                .collect();
        }
        candidates
            .into_par_iter()
            .map(|pheno| {
                let score = ensure_finite(self.challenge.score(&pheno))?;
                Ok(EvolutionResult { pheno, score })
            })
            .collect()
    }
}

/// Submits candidates to a broker channel and collects whatever returns
/// within the population's wait-factor bound.
pub struct BrokerEvaluator<Pheno, Chall>
where
    Pheno: Phenotype + 'static,
    Chall: Challenge<Pheno> + Clone + Send + 'static,
{
    population: BrokerPopulation<Evaluation<Pheno, Chall>>,
    challenge: Chall,
}

impl<Pheno, Chall> BrokerEvaluator<Pheno, Chall>
where
    Pheno: Phenotype + 'static,
    Chall: Challenge<Pheno> + Clone + Send + 'static,
{
    /// Registers a channel on `broker` with default population options.
    pub fn new(broker: Arc<Broker<Evaluation<Pheno, Chall>>>, challenge: Chall) -> Self {
        Self {
            population: BrokerPopulation::new(broker),
            challenge,
        }
    }

    /// Registers a channel on `broker` with the given population options.
    pub fn with_options(
        broker: Arc<Broker<Evaluation<Pheno, Chall>>>,
        challenge: Chall,
        options: PopulationOptions,
    ) -> Self {
        Self {
            population: BrokerPopulation::with_options(broker, options),
            challenge,
        }
    }
}

impl<Pheno, Chall> Evaluator<Pheno> for BrokerEvaluator<Pheno, Chall>
where
    Pheno: Phenotype + 'static,
    Chall: Challenge<Pheno> + Clone + Send + 'static,
{
    fn evaluate(&mut self, candidates: Vec<Pheno>) -> Result<Vec<EvolutionResult<Pheno>>> {
        let items = candidates
            .into_iter()
            .map(|phenotype| Evaluation {
                phenotype,
                challenge: self.challenge.clone(),
            })
            .collect();
        let returned = self.population.evaluate_generation(items)?;

        let mut results = Vec::new();
        for envelope in returned.into_iter().flatten() {
            // A returned item without a recorded score is a consumer bug;
            // it contributes nothing to the generation.
            let Some(score) = envelope.fitness() else {
                continue;
            };
            let score = ensure_finite(score)?;
            results.push(EvolutionResult {
                pheno: envelope.into_work().phenotype,
                score,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Number(f64);

    impl Phenotype for Number {
        fn crossover(&mut self, other: &Self) {
            self.0 = (self.0 + other.0) / 2.0;
        }

        fn mutate(&mut self, rng: &mut FactoryRng) {
            self.0 += rng.uniform_range(-1.0, 1.0);
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct NegativeSquare;

    impl Challenge<Number> for NegativeSquare {
        fn score(&self, phenotype: &Number) -> f64 {
            -(phenotype.0 * phenotype.0)
        }
    }

    #[derive(Debug, Clone)]
    struct AlwaysNan;

    impl Challenge<Number> for AlwaysNan {
        fn score(&self, _phenotype: &Number) -> f64 {
            f64::NAN
        }
    }

    #[test]
    fn test_serial_evaluator_scores_everything() {
        let mut evaluator = SerialEvaluator::new(NegativeSquare);
        let results = evaluator
            .evaluate(vec![Number(1.0), Number(2.0), Number(3.0)])
            .unwrap();
        let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![-1.0, -4.0, -9.0]);
    }

    #[test]
    fn test_parallel_evaluator_matches_serial() {
        let candidates: Vec<Number> = (0..100).map(|i| Number(i as f64)).collect();
        let mut serial = SerialEvaluator::new(NegativeSquare);
        let mut parallel = ParallelEvaluator::new(NegativeSquare, 10);

        let serial_scores: Vec<f64> = serial
            .evaluate(candidates.clone())
            .unwrap()
            .iter()
            .map(|r| r.score)
            .collect();
        let mut parallel_scores: Vec<f64> = parallel
            .evaluate(candidates)
            .unwrap()
            .iter()
            .map(|r| r.score)
            .collect();
        parallel_scores.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mut sorted_serial = serial_scores;
        sorted_serial.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(parallel_scores, sorted_serial);
    }

    #[test]
    fn test_non_finite_fitness_is_an_error() {
        let mut evaluator = SerialEvaluator::new(AlwaysNan);
        assert!(matches!(
            evaluator.evaluate(vec![Number(1.0)]),
            Err(GeneticError::FitnessCalculation(_))
        ));
    }
}
