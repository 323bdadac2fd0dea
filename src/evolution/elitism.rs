use crate::evolution::generation::{Generation, Statistics};
use crate::strategy::{Strategy, StrategyBounds};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// `floor(percentage * capacity)`, never more than the capacity.
pub fn elite_count(percentage: f64, capacity: usize) -> usize {
    if !percentage.is_finite() || percentage <= 0.0 {
        return 0;
    }
    ((percentage * capacity as f64).floor() as usize).min(capacity)
}

/// Copies the best `floor(percentage * capacity)` individuals of the sorted
/// `current` into the front of `next`, overwriting whatever children sit there.
///
/// # Returns
/// Number of elites copied.
pub fn elitism(current: &Generation, next: &mut Generation, percentage: f64) -> usize {
    let elite = elite_count(percentage, next.capacity()).min(current.len());

    for (index, strategy) in current.individuals()[..elite].iter().enumerate() {
        match next.get_mut(index) {
            Some(slot) => slot.clone_from(strategy),
            None => {
                next.push_clone(strategy);
            }
        }
    }
    elite
}

fn default_invalid_threshold() -> f64 {
    0.5
}

fn default_max_stagnation() -> u64 {
    200
}

fn default_refill_ratio() -> f64 {
    0.2
}

/// When the population counts as degenerate, and how much of it gets replaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefillPolicy {
    /// Invalid fraction above which the population is degenerate.
    #[serde(default = "default_invalid_threshold")]
    pub invalid_threshold: f64,
    /// Generations without improvement above which the population is degenerate.
    #[serde(default = "default_max_stagnation")]
    pub max_stagnation: u64,
    /// Fraction of the capacity replaced by random individuals when degenerate.
    #[serde(default = "default_refill_ratio")]
    pub refill_ratio: f64,
}

impl Default for RefillPolicy {
    fn default() -> Self {
        RefillPolicy {
            invalid_threshold: default_invalid_threshold(),
            max_stagnation: default_max_stagnation(),
            refill_ratio: default_refill_ratio(),
        }
    }
}

impl RefillPolicy {
    pub fn is_degenerate(&self, statistics: &Statistics, population: usize) -> bool {
        if population == 0 {
            return false;
        }
        let invalid_ratio = statistics.invalid_count as f64 / population as f64;
        invalid_ratio > self.invalid_threshold
            || statistics.last_change_generations > self.max_stagnation
    }
}

/// Tops `next` up to capacity after crossover and elitism.
///
/// Degenerate populations get fresh random individuals in every empty slot,
/// and the last `refill_ratio * capacity` non-elite slots are replaced too.
/// Otherwise empty slots are filled with survivors of `current` in rank order.
///
/// # Returns
/// Number of slots written.
pub fn refill<R: Rng + ?Sized>(
    current: &Generation,
    next: &mut Generation,
    degenerate: bool,
    elite: usize,
    policy: &RefillPolicy,
    bounds: &StrategyBounds,
    rng: &mut R,
) -> usize {
    let mut written = 0;

    if degenerate {
        while !next.is_full() {
            if next.push(Strategy::random(bounds, rng)).is_err() {
                break;
            }
            written += 1;
        }

        let replace = elite_count(policy.refill_ratio, next.capacity());
        let start = next.len().saturating_sub(replace).max(elite);
        for index in start..next.len() {
            if let Some(slot) = next.get_mut(index) {
                *slot = Strategy::random(bounds, rng);
                written += 1;
            }
        }
    } else if !current.is_empty() {
        for survivor in current.individuals().iter().cycle() {
            if !next.push_clone(survivor) {
                break;
            }
            written += 1;
        }
    }

    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulationStatus;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn generation_with_fitness(fitness: &[f64]) -> Generation {
        let strategies = fitness
            .iter()
            .map(|&f| {
                let mut s = Strategy::default();
                s.fitness = f;
                s.simulation.status = SimulationStatus::Ok;
                s
            })
            .collect();
        let mut generation = Generation::from_strategies(fitness.len(), strategies);
        generation.sort_by_fitness();
        generation
    }

    // Test elitism copies exactly the two lowest of ten at 20%.
    #[test]
    fn test_elitism_copies_exact_elite() {
        let current = generation_with_fitness(&[7.0, 3.0, 9.0, 1.0, 5.0, 2.0, 8.0, 4.0, 6.0, 10.0]);
        let mut next = generation_with_fitness(&[50.0; 10]);

        let copied = elitism(&current, &mut next, 0.2);
        assert_eq!(copied, 2);
        assert_eq!(next.len(), 10);
        assert_eq!(next.individuals()[0].fitness, 1.0);
        assert_eq!(next.individuals()[1].fitness, 2.0);
        assert!(next.individuals()[2..].iter().all(|s| s.fitness == 50.0));
    }

    #[test]
    fn test_elitism_into_empty_next_extends_count() {
        let current = generation_with_fitness(&[1.0, 2.0, 3.0, 4.0]);
        let mut next = Generation::empty(4);
        assert_eq!(elitism(&current, &mut next, 0.5), 2);
        assert_eq!(next.len(), 2);
    }

    #[test]
    fn test_elite_count_edges() {
        assert_eq!(elite_count(0.0, 10), 0);
        assert_eq!(elite_count(0.19, 10), 1);
        assert_eq!(elite_count(2.0, 10), 10);
        assert_eq!(elite_count(f64::NAN, 10), 0);
    }

    #[test]
    fn test_degeneracy_detection() {
        let policy = RefillPolicy::default();
        let mut stats = Statistics {
            invalid_count: 5,
            ..Default::default()
        };
        assert!(!policy.is_degenerate(&stats, 10), "Exactly at the threshold is not degenerate");
        stats.invalid_count = 6;
        assert!(policy.is_degenerate(&stats, 10));
        stats.invalid_count = 0;
        stats.last_change_generations = 201;
        assert!(policy.is_degenerate(&stats, 10));
    }

    // Healthy refill clones survivors in rank order.
    #[test]
    fn test_refill_clones_survivors() {
        let mut rng = StdRng::seed_from_u64(1);
        let current = generation_with_fitness(&[1.0, 2.0, 3.0]);
        let mut next = Generation::empty(5);
        next.push(Strategy::default()).unwrap();

        let written = refill(
            &current,
            &mut next,
            false,
            0,
            &RefillPolicy::default(),
            &StrategyBounds::default(),
            &mut rng,
        );
        assert_eq!(written, 4);
        let fitness: Vec<f64> = next.individuals()[1..].iter().map(|s| s.fitness).collect();
        assert_eq!(fitness, vec![1.0, 2.0, 3.0, 1.0]);
    }

    // Degenerate refill replaces the tail but never the elites.
    #[test]
    fn test_degenerate_refill_spares_elites() {
        let mut rng = StdRng::seed_from_u64(1);
        let current = generation_with_fitness(&[1.0; 10]);
        let mut next = generation_with_fitness(&[1.0; 10]);
        let policy = RefillPolicy {
            refill_ratio: 1.0,
            ..Default::default()
        };

        let written = refill(
            &current,
            &mut next,
            true,
            3,
            &policy,
            &StrategyBounds::default(),
            &mut rng,
        );
        assert_eq!(written, 7);
        assert!(next.individuals()[..3].iter().all(|s| s.fitness == 1.0));
        assert!(next.individuals()[3..].iter().all(|s| s.fitness.is_infinite()));
    }
}
