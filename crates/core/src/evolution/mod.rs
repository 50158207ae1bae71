mod engine;
mod fitness;
pub mod operators;
mod types;

pub use engine::EvolutionEngine;
pub use fitness::{FitnessConfig, FitnessEvaluator, FitnessWeights};
pub use types::*;
