use crate::evolution::EvolutionError;
use crate::simulation::{FitnessFunction, SimulationContext, Simulator};
use crate::strategy::{fitness_serde, Strategy, StrategyBounds};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Aggregate statistics of one evaluated generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(with = "fitness_serde")]
    pub fitness_min: f64,
    #[serde(with = "fitness_serde")]
    pub fitness_max: f64,
    #[serde(with = "fitness_serde")]
    pub fitness_median: f64,
    #[serde(with = "fitness_serde")]
    pub fitness_avg: f64,
    pub length_avg: f64,
    /// Mean similarity over valid individuals only.
    pub similarity_avg: f64,
    pub invalid_count: usize,
    /// Generations elapsed since the all-time best last improved.
    pub last_change_generations: u64,
}

/// All-time best individual, kept apart from the generation buffers so that
/// swapping them can never lose or regress it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BestRecord {
    pub strategy: Strategy,
    pub generations_since_improvement: u64,
    /// Generation index of the last improvement, set by the engine.
    pub improved_at: Option<u64>,
}

impl BestRecord {
    /// No prior best: fitness is +inf so the first evaluated generation wins.
    pub fn new() -> Self {
        BestRecord::default()
    }

    pub fn fitness(&self) -> f64 {
        self.strategy.fitness
    }

    /// Replaces the record only if `candidate` is strictly better.
    /// Returns whether it did.
    pub fn offer(&mut self, candidate: &Strategy) -> bool {
        if candidate.fitness < self.strategy.fitness {
            self.strategy.clone_from(candidate);
            self.generations_since_improvement = 0;
            true
        } else {
            self.generations_since_improvement += 1;
            false
        }
    }
}

/// Simulates every strategy of `strategies`, then computes its similarity to
/// `best` and its fitness. Each slot is written by exactly one rayon task; the
/// only shared state is the read-only `best`.
///
/// Runs on whichever rayon pool the caller is installed in, so workers with a
/// dedicated pool keep their threads to themselves.
pub fn evaluate_strategies(
    strategies: &mut [Strategy],
    best: &Strategy,
    context: &SimulationContext,
    simulator: &dyn Simulator,
    fitness_function: &dyn FitnessFunction,
) {
    strategies.par_iter_mut().for_each(|strategy| {
        strategy.simulation = simulator.simulate(strategy, context);
        strategy.similarity = strategy.similarity_to(best);
        strategy.fitness = fitness_function.fitness(strategy);
    });
}

/// Fixed-capacity population. Slots beyond `count` hold stale storage that is
/// reused when the generation is refilled.
#[derive(Debug, Clone)]
pub struct Generation {
    individuals: Vec<Strategy>,
    count: usize,
    pub statistics: Statistics,
}

/// Serializable view of the occupied part of a generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSnapshot {
    pub capacity: usize,
    pub individuals: Vec<Strategy>,
    pub statistics: Statistics,
}

impl Generation {
    pub fn empty(capacity: usize) -> Self {
        Generation {
            individuals: vec![Strategy::default(); capacity],
            count: 0,
            statistics: Statistics::default(),
        }
    }

    pub fn random<R: Rng + ?Sized>(capacity: usize, bounds: &StrategyBounds, rng: &mut R) -> Self {
        Generation {
            individuals: (0..capacity)
                .map(|_| Strategy::random(bounds, rng))
                .collect(),
            count: capacity,
            statistics: Statistics::default(),
        }
    }

    /// Builds a generation of `capacity` slots from already existing strategies.
    /// Anything beyond capacity is dropped.
    pub fn from_strategies(capacity: usize, strategies: Vec<Strategy>) -> Self {
        let mut individuals: Vec<Strategy> = strategies.into_iter().take(capacity).collect();
        let count = individuals.len();
        individuals.resize_with(capacity, Strategy::default);
        Generation {
            individuals,
            count,
            statistics: Statistics::default(),
        }
    }

    pub fn snapshot(&self) -> GenerationSnapshot {
        GenerationSnapshot {
            capacity: self.capacity(),
            individuals: self.individuals().to_vec(),
            statistics: self.statistics.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.individuals.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.capacity()
    }

    /// Occupied slots.
    pub fn individuals(&self) -> &[Strategy] {
        &self.individuals[..self.count]
    }

    pub fn individuals_mut(&mut self) -> &mut [Strategy] {
        &mut self.individuals[..self.count]
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Strategy> {
        self.individuals_mut().get_mut(index)
    }

    /// Appends into the next free slot. Hands the strategy back if full.
    pub fn push(&mut self, strategy: Strategy) -> Result<(), Strategy> {
        if self.is_full() {
            return Err(strategy);
        }
        self.individuals[self.count] = strategy;
        self.count += 1;
        Ok(())
    }

    /// Appends a copy of `strategy`, reusing the slot's allocation.
    pub fn push_clone(&mut self, strategy: &Strategy) -> bool {
        if self.is_full() {
            return false;
        }
        self.individuals[self.count].clone_from(strategy);
        self.count += 1;
        true
    }

    /// Marks every slot free without releasing storage. Statistics are reset
    /// since they no longer describe any individual.
    pub fn clear(&mut self) {
        self.count = 0;
        self.statistics = Statistics::default();
    }

    pub fn invalid_ratio(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.statistics.invalid_count as f64 / self.count as f64
    }

    pub fn evaluate_fitness(
        &mut self,
        best: &Strategy,
        context: &SimulationContext,
        simulator: &dyn Simulator,
        fitness_function: &dyn FitnessFunction,
    ) {
        evaluate_strategies(
            self.individuals_mut(),
            best,
            context,
            simulator,
            fitness_function,
        );
    }

    /// Ascending by fitness; NaN sorts last.
    pub fn sort_by_fitness(&mut self) {
        self.individuals_mut()
            .sort_unstable_by(|a, b| a.compare_fitness(b));
    }

    /// Recomputes [`Statistics`] and offers the generation's best to `best`.
    /// The generation must already be sorted. Returns whether the all-time
    /// best improved.
    pub fn update_statistics(&mut self, best: &mut BestRecord) -> Result<bool, EvolutionError> {
        let count = self.count;
        if count == 0 {
            return Err(EvolutionError::EmptyGeneration);
        }
        let individuals = &self.individuals[..count];

        let mut fitness_sum = 0.0;
        let mut length_sum = 0usize;
        let mut similarity_sum = 0.0;
        let mut invalid_count = 0usize;
        for strategy in individuals {
            fitness_sum += strategy.fitness;
            length_sum += strategy.len();
            if strategy.is_valid() {
                similarity_sum += strategy.similarity;
            } else {
                invalid_count += 1;
            }
        }

        let valid_count = count - invalid_count;
        let improved = best.offer(&individuals[0]);

        self.statistics = Statistics {
            fitness_min: individuals[0].fitness,
            fitness_max: individuals[count - 1].fitness,
            fitness_median: individuals[count / 2].fitness,
            fitness_avg: fitness_sum / count as f64,
            length_avg: length_sum as f64 / count as f64,
            // All invalid: nothing to average, report zero.
            similarity_avg: if valid_count == 0 {
                0.0
            } else {
                similarity_sum / valid_count as f64
            },
            invalid_count,
            last_change_generations: best.generations_since_improvement,
        };

        Ok(improved)
    }
}
