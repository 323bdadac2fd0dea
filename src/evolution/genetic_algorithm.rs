use crate::config::EvolutionConfig;
use crate::evolution::crossover::{cross_over, Crossover};
use crate::evolution::elitism::{elite_count, elitism, refill, RefillPolicy};
use crate::evolution::evaluator::PopulationEvaluator;
use crate::evolution::generation::{BestRecord, Generation, Statistics};
use crate::evolution::mutation::{mutation, MutationRate};
use crate::evolution::selection::Selection;
use crate::evolution::EvolutionError;
use crate::simulation::SimulationContext;
use crate::strategy::{Strategy, StrategyBounds};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Wall time spent in each phase of one generation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GenerationTimings {
    pub evaluation: Duration,
    pub sorting: Duration,
    pub crossover: Duration,
    pub mutation: Duration,
    pub elitism: Duration,
    pub total: Duration,
}

/// What happened during one call to [`GeneticAlgorithm::advance_generation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Index of the generation that was evaluated.
    pub generation: u64,
    pub individuals: usize,
    pub capacity: usize,
    pub children: usize,
    pub mutations: usize,
    pub elites: usize,
    pub refilled: usize,
    pub degenerate: bool,
    pub improved: bool,
    pub statistics: Statistics,
    pub best_fitness: f64,
    pub best_energy: f64,
    pub best_time: f64,
    pub timings: GenerationTimings,
}

impl fmt::Display for GenerationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.statistics;
        writeln!(
            f,
            "Generation {} ({}/{} individuals, {} invalid)",
            self.generation, self.individuals, self.capacity, s.invalid_count
        )?;
        writeln!(
            f,
            "  best: fitness {:.3}, energy {:.3} kJ, time {:.2} s, unchanged for {} generations",
            self.best_fitness, self.best_energy, self.best_time, s.last_change_generations
        )?;
        writeln!(
            f,
            "  fitness: min {:.3}, max {:.3}, median {:.3}, avg {:.3}",
            s.fitness_min, s.fitness_max, s.fitness_median, s.fitness_avg
        )?;
        writeln!(
            f,
            "  length avg {:.2}, similarity avg {:.3}",
            s.length_avg, s.similarity_avg
        )?;
        write!(
            f,
            "  timings: evaluation {:?}, sort {:?}, crossover {:?}, mutation {:?}, elitism {:?}, total {:?}",
            self.timings.evaluation,
            self.timings.sorting,
            self.timings.crossover,
            self.timings.mutation,
            self.timings.elitism,
            self.timings.total
        )
    }
}

/// Serializable summary of the engine's operator set, written on shutdown and
/// shown by the `params` console command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaParams {
    pub population_size: usize,
    pub elitism_rate: f64,
    pub refill: RefillPolicy,
    pub selection: Selection,
    pub crossover: Crossover,
    pub mutations: Vec<MutationRate>,
    pub bounds: StrategyBounds,
    pub generation_count: u64,
}

impl fmt::Display for GaParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GA parameters (generation {})", self.generation_count)?;
        writeln!(f, "  population size: {}", self.population_size)?;
        writeln!(f, "  elitism: {:.2}", self.elitism_rate)?;
        writeln!(
            f,
            "  refill: invalid > {:.2} or stagnation > {}, ratio {:.2}",
            self.refill.invalid_threshold, self.refill.max_stagnation, self.refill.refill_ratio
        )?;
        writeln!(f, "  selection: {}", self.selection)?;
        writeln!(f, "  crossover: {}", self.crossover)?;
        write!(f, "  mutations:")?;
        for (index, row) in self.mutations.iter().enumerate() {
            write!(f, "\n    [{}] {}: {:.2}", index, row.mutation, row.rate)?;
        }
        Ok(())
    }
}

/// Double buffered generational engine.
///
/// Operators read `current` and write `next`; the two swap roles at the end of
/// every generation. The all-time best lives in its own [`BestRecord`].
pub struct GeneticAlgorithm {
    slabs: [Generation; 2],
    current: usize,
    selection: Selection,
    crossover: Crossover,
    mutations: Vec<MutationRate>,
    generation_count: u64,
    best: BestRecord,
    config: EvolutionConfig,
    rng: StdRng,
}

fn split_buffers(slabs: &mut [Generation; 2], current: usize) -> (&mut Generation, &mut Generation) {
    let (first, second) = slabs.split_at_mut(1);
    if current == 0 {
        (&mut first[0], &mut second[0])
    } else {
        (&mut second[0], &mut first[0])
    }
}

impl GeneticAlgorithm {
    /// Engine seeded with a random first generation.
    pub fn new(config: EvolutionConfig) -> Result<Self, EvolutionError> {
        Self::with_initial_population(config, Vec::new())
    }

    /// Engine whose first generation starts from `strategies` (e.g. a saved
    /// generation). Missing slots are filled randomly, extra ones dropped.
    pub fn with_initial_population(
        config: EvolutionConfig,
        strategies: Vec<Strategy>,
    ) -> Result<Self, EvolutionError> {
        config.validate()?;
        if elite_count(config.elitism_rate, config.population_size) == 0 && config.elitism_rate > 0.0 {
            warn!(
                population = config.population_size,
                elitism_rate = config.elitism_rate,
                "Elite count rounded to 0, check population size and elitism rate"
            );
        }

        let mut rng = match config.global_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let capacity = config.population_size;
        let mut current = Generation::from_strategies(capacity, strategies);
        let loaded = current.len();
        while !current.is_full() {
            if current.push(Strategy::random(&config.bounds, &mut rng)).is_err() {
                break;
            }
        }
        for strategy in current.individuals_mut() {
            strategy
                .change_points
                .truncate(config.bounds.max_change_points);
        }
        debug!(
            loaded,
            random = capacity - loaded,
            "Initialized first generation"
        );

        Ok(GeneticAlgorithm {
            slabs: [current, Generation::empty(capacity)],
            current: 0,
            selection: config.selection,
            crossover: config.crossover,
            mutations: config.mutations.clone(),
            generation_count: 0,
            best: BestRecord::new(),
            config,
            rng,
        })
    }

    pub fn current(&self) -> &Generation {
        &self.slabs[self.current]
    }

    pub fn next(&self) -> &Generation {
        &self.slabs[1 - self.current]
    }

    pub fn best(&self) -> &BestRecord {
        &self.best
    }

    pub fn generation_count(&self) -> u64 {
        self.generation_count
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn mutations(&self) -> &[MutationRate] {
        &self.mutations
    }

    /// Updates one row of the mutation table. Nothing changes on error.
    pub fn set_mutation_rate(&mut self, index: usize, rate: f64) -> Result<(), EvolutionError> {
        let count = self.mutations.len();
        let row = self
            .mutations
            .get_mut(index)
            .ok_or(EvolutionError::InvalidMutationIndex { index, count })?;
        if !(0.0..=1.0).contains(&rate) {
            return Err(EvolutionError::InvalidMutationRate(rate));
        }
        row.rate = rate;
        Ok(())
    }

    pub fn params(&self) -> GaParams {
        GaParams {
            population_size: self.config.population_size,
            elitism_rate: self.config.elitism_rate,
            refill: self.config.refill,
            selection: self.selection,
            crossover: self.crossover,
            mutations: self.mutations.clone(),
            bounds: self.config.bounds,
            generation_count: self.generation_count,
        }
    }

    /// Evaluates `current` with `evaluator`, then breeds `next` from it and
    /// swaps the buffers.
    pub async fn advance_generation(
        &mut self,
        evaluator: &dyn PopulationEvaluator,
        context: &SimulationContext,
    ) -> Result<GenerationReport, EvolutionError> {
        let started = Instant::now();
        evaluator
            .evaluate(&mut self.slabs[self.current], &self.best.strategy, context)
            .await?;
        let evaluation = started.elapsed();

        let mut report = self.breed()?;
        report.timings.evaluation = evaluation;
        report.timings.total = started.elapsed();
        Ok(report)
    }

    /// Everything after evaluation: sort, statistics, crossover, mutation,
    /// elitism, refill and the swap. `current` must already be evaluated.
    pub fn breed(&mut self) -> Result<GenerationReport, EvolutionError> {
        let started = Instant::now();
        let mut timings = GenerationTimings::default();
        let bounds = self.config.bounds;
        let (current, next) = split_buffers(&mut self.slabs, self.current);

        // --- Sort & statistics ---
        let timer = Instant::now();
        current.sort_by_fitness();
        let improved = current.update_statistics(&mut self.best)?;
        if improved {
            self.best.improved_at = Some(self.generation_count);
        }
        let degenerate = self
            .config
            .refill
            .is_degenerate(&current.statistics, current.len());
        if degenerate {
            debug!(
                generation = self.generation_count,
                invalid = current.statistics.invalid_count,
                stagnation = current.statistics.last_change_generations,
                "Population is degenerate, refilling"
            );
        }
        timings.sorting = timer.elapsed();

        // --- Crossover ---
        let timer = Instant::now();
        let children = cross_over(
            current,
            next,
            &self.selection,
            &self.crossover,
            &bounds,
            &mut self.rng,
        );
        timings.crossover = timer.elapsed();

        // --- Mutation ---
        let timer = Instant::now();
        let mut mutated = 0;
        for row in &self.mutations {
            mutated += mutation(next, &row.mutation, row.rate, &bounds, &mut self.rng);
        }
        timings.mutation = timer.elapsed();

        // --- Elitism & refill ---
        let timer = Instant::now();
        let elites = elitism(current, next, self.config.elitism_rate);
        let refilled = refill(
            current,
            next,
            degenerate,
            elites,
            &self.config.refill,
            &bounds,
            &mut self.rng,
        );
        timings.elitism = timer.elapsed();
        timings.total = started.elapsed();

        let report = GenerationReport {
            generation: self.generation_count,
            individuals: current.len(),
            capacity: current.capacity(),
            children,
            mutations: mutated,
            elites,
            refilled,
            degenerate,
            improved,
            statistics: current.statistics.clone(),
            best_fitness: self.best.strategy.fitness,
            best_energy: self.best.strategy.simulation.energy,
            best_time: self.best.strategy.simulation.time,
            timings,
        };

        // --- Swap ---
        self.current = 1 - self.current;
        self.slabs[1 - self.current].clear();
        self.generation_count += 1;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::evaluator::LocalEvaluator;
    use crate::simulation::{EnergyFitness, KinematicSimulator, VehicleModel};
    use std::sync::Arc;

    fn config(seed: u64) -> EvolutionConfig {
        EvolutionConfig {
            population_size: 20,
            bounds: StrategyBounds {
                track_steps: 60,
                max_change_points: 8,
                initial_change_points: 4,
            },
            global_seed: Some(seed),
            ..Default::default()
        }
    }

    fn evaluator(bounds: &StrategyBounds) -> LocalEvaluator {
        LocalEvaluator::new(
            Arc::new(KinematicSimulator::new(VehicleModel::default(), bounds)),
            Arc::new(EnergyFitness::default()),
        )
    }

    // Test a few generations keep the population full and the best monotonic.
    #[tokio::test]
    async fn test_advance_generation_keeps_invariants() {
        let cfg = config(42);
        let evaluator = evaluator(&cfg.bounds);
        let mut engine = GeneticAlgorithm::new(cfg).unwrap();
        let context = SimulationContext::default();

        let mut previous_best = f64::INFINITY;
        for generation in 0..6 {
            let report = engine.advance_generation(&evaluator, &context).await.unwrap();
            assert_eq!(report.generation, generation);
            assert_eq!(report.individuals, 20);
            assert!(report.best_fitness <= previous_best, "Best regressed");
            assert!(report.best_fitness.is_finite());
            previous_best = report.best_fitness;

            assert_eq!(engine.current().len(), 20, "Next generation not full");
            assert!(engine.next().is_empty(), "Next buffer not reset on swap");
        }
        assert_eq!(engine.generation_count(), 6);
        assert!(engine.best().improved_at.is_some());
    }

    // The same seed replays the same run.
    #[tokio::test]
    async fn test_seeded_runs_are_reproducible() {
        let context = SimulationContext::default();
        let mut results = Vec::new();
        for _ in 0..2 {
            let cfg = config(7);
            let evaluator = evaluator(&cfg.bounds);
            let mut engine = GeneticAlgorithm::new(cfg).unwrap();
            for _ in 0..3 {
                engine.advance_generation(&evaluator, &context).await.unwrap();
            }
            results.push(engine.best().fitness());
        }
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn test_set_mutation_rate_validates() {
        let mut engine = GeneticAlgorithm::new(config(1)).unwrap();
        let before = engine.mutations().to_vec();
        let count = before.len();

        assert!(matches!(
            engine.set_mutation_rate(count, 0.5),
            Err(EvolutionError::InvalidMutationIndex { .. })
        ));
        assert!(matches!(
            engine.set_mutation_rate(0, 1.5),
            Err(EvolutionError::InvalidMutationRate(_))
        ));
        assert!(engine.set_mutation_rate(0, f64::NAN).is_err());
        assert_eq!(engine.mutations(), &before[..], "Table changed on error");

        engine.set_mutation_rate(count - 1, 0.75).unwrap();
        assert_eq!(engine.mutations()[count - 1].rate, 0.75);
    }

    #[test]
    fn test_initial_population_topped_up() {
        let cfg = config(3);
        let saved = vec![Strategy::default(); 5];
        let engine = GeneticAlgorithm::with_initial_population(cfg, saved).unwrap();
        assert_eq!(engine.current().len(), 20);
        assert!(engine.current().individuals()[..5].iter().all(|s| s.is_empty()));
    }

    #[test]
    fn test_params_render_mutation_indices() {
        let engine = GeneticAlgorithm::new(config(1)).unwrap();
        let rendered = engine.params().to_string();
        assert!(rendered.contains("[0] add point: 0.05"), "Got {}", rendered);
        assert!(rendered.contains("population size: 20"));
    }
}
