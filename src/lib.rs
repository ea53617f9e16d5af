pub mod broker;
pub mod buffer;
pub mod error;
pub mod evolution;
pub mod net;
pub mod phenotype;
pub mod population;
pub mod random;
pub mod selection;
pub mod strategy;

// Re-export commonly used types for convenience
pub use broker::{Broker, ChannelId, Consumer, Envelope, ThreadPoolConsumer, WorkItem};
pub use error::{GeneticError, Result, ResultExt};
pub use population::BrokerPopulation;
