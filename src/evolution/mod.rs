use thiserror::Error;

pub mod crossover;
pub mod elitism;
pub mod evaluator;
pub mod generation;
pub mod genetic_algorithm;
pub mod mutation;
pub mod selection;

pub use crossover::{cross_over, single_point_crossover, Crossover};
pub use elitism::{elite_count, elitism, refill, RefillPolicy};
pub use evaluator::{LocalEvaluator, PopulationEvaluator};
pub use generation::{evaluate_strategies, BestRecord, Generation, GenerationSnapshot, Statistics};
pub use genetic_algorithm::{GaParams, GenerationReport, GenerationTimings, GeneticAlgorithm};
pub use mutation::{mutation, Mutation, MutationRate};
pub use selection::Selection;

#[derive(Error, Debug)]
pub enum EvolutionError {
    #[error("Invalid population parameters were passed: {0}")]
    BadPopulationParameter(String),
    #[error("Generation has no individuals")]
    EmptyGeneration,
    #[error("Invalid mutation index {index}, expected a value below {count}")]
    InvalidMutationIndex { index: usize, count: usize },
    #[error("Invalid mutation rate {0:.2}, expected a value in [0, 1]")]
    InvalidMutationRate(f64),
    #[error("Fitness evaluation failed: {0}")]
    Evaluation(String),
}
