pub mod challenge;
pub mod evaluator;
pub mod launcher;
pub mod options;

pub use challenge::Challenge;
pub use evaluator::{BrokerEvaluator, Evaluation, Evaluator, ParallelEvaluator, SerialEvaluator};
pub use launcher::{EvolutionLauncher, EvolutionResult};
pub use options::EvolutionOptions;
