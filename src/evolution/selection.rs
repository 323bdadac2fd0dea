use crate::consts::{DEFAULT_SELECTION_PRESSURE, DEFAULT_TOURNAMENT_SIZE};
use crate::evolution::generation::Generation;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_tournament_size() -> usize {
    DEFAULT_TOURNAMENT_SIZE
}

fn default_pressure() -> f64 {
    DEFAULT_SELECTION_PRESSURE
}

/// Parent selection scheme. Every variant works on an evaluated generation
/// sorted ascending by fitness and only ever reads it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Selection {
    /// Weight `1 / (1 + f - f_min)`, non-finite fitness weighs zero.
    FitnessProportional,
    /// Best of `size` uniform draws, with replacement.
    Tournament {
        #[serde(default = "default_tournament_size")]
        size: usize,
    },
    /// Linear ranking, `pressure` in `[1, 2]`.
    LinearRank {
        #[serde(default = "default_pressure")]
        pressure: f64,
    },
}

impl Default for Selection {
    fn default() -> Self {
        Selection::LinearRank {
            pressure: DEFAULT_SELECTION_PRESSURE,
        }
    }
}

impl Selection {
    /// Index of the selected individual, `None` if the generation is empty.
    pub fn select<R: Rng + ?Sized>(&self, generation: &Generation, rng: &mut R) -> Option<usize> {
        let individuals = generation.individuals();
        if individuals.is_empty() {
            return None;
        }

        let index = match *self {
            Selection::FitnessProportional => {
                let f_min = individuals
                    .iter()
                    .map(|s| s.fitness)
                    .filter(|f| f.is_finite())
                    .fold(f64::INFINITY, f64::min);
                let weights: Vec<f64> = individuals
                    .iter()
                    .map(|s| {
                        if s.fitness.is_finite() {
                            1.0 / (1.0 + s.fitness - f_min)
                        } else {
                            0.0
                        }
                    })
                    .collect();
                weighted_or_uniform(&weights, rng)
            }
            Selection::Tournament { size } => (0..size.max(1))
                .map(|_| rng.gen_range(0..individuals.len()))
                .min_by(|&a, &b| individuals[a].compare_fitness(&individuals[b]))
                .unwrap_or(0),
            Selection::LinearRank { pressure } => {
                let n = individuals.len();
                if n == 1 {
                    return Some(0);
                }
                let weights = linear_rank_probabilities(n, pressure);
                weighted_or_uniform(&weights, rng)
            }
        };
        Some(index)
    }
}

/// `p_i = (pressure - (2 pressure - 2) i / (n - 1)) / n` for rank `i`, 0 being
/// the best. Sums to one.
pub fn linear_rank_probabilities(n: usize, pressure: f64) -> Vec<f64> {
    let pressure = pressure.clamp(1.0, 2.0);
    if n <= 1 {
        return vec![1.0; n];
    }
    let last = (n - 1) as f64;
    (0..n)
        .map(|i| (pressure - (2.0 * pressure - 2.0) * i as f64 / last) / n as f64)
        .collect()
}

fn weighted_or_uniform<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    // WeightedIndex rejects an all-zero table, fall back to uniform then.
    match WeightedIndex::new(weights) {
        Ok(distribution) => distribution.sample(rng),
        Err(_) => rng.gen_range(0..weights.len()),
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::FitnessProportional => write!(f, "fitness proportional"),
            Selection::Tournament { size } => write!(f, "tournament (size {size})"),
            Selection::LinearRank { pressure } => write!(f, "linear rank (pressure {pressure:.2})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulationStatus;
    use crate::strategy::Strategy;
    use rand::rngs::StdRng;

    fn sorted_generation(fitness: &[f64]) -> Generation {
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

    #[test]
    fn test_linear_rank_probabilities_sum_to_one() {
        for n in [2, 3, 10, 100] {
            let p = linear_rank_probabilities(n, 1.8);
            let total: f64 = p.iter().sum();
            assert!((total - 1.0).abs() < 1e-9, "n={} sums to {}", n, total);
            assert!(p.windows(2).all(|w| w[0] >= w[1]), "Best rank should weigh most");
        }
    }

    #[test]
    fn test_empty_generation_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(0);
        let generation = Generation::empty(5);
        for selection in [
            Selection::FitnessProportional,
            Selection::Tournament { size: 3 },
            Selection::default(),
        ] {
            assert_eq!(selection.select(&generation, &mut rng), None);
        }
    }

    #[test]
    fn test_single_individual_always_selected() {
        let mut rng = StdRng::seed_from_u64(0);
        let generation = sorted_generation(&[4.0]);
        assert_eq!(Selection::default().select(&generation, &mut rng), Some(0));
    }

    // Selection favours the fitter end of the population.
    #[test]
    fn test_selection_pressure_favours_low_fitness() {
        let mut rng = StdRng::seed_from_u64(11);
        let fitness: Vec<f64> = (0..20).map(|f| f as f64).collect();
        let generation = sorted_generation(&fitness);
        for selection in [
            Selection::FitnessProportional,
            Selection::Tournament { size: 3 },
            Selection::LinearRank { pressure: 2.0 },
        ] {
            let mut top_half = 0;
            for _ in 0..2000 {
                let index = selection.select(&generation, &mut rng).unwrap();
                assert!(index < 20);
                if index < 10 {
                    top_half += 1;
                }
            }
            assert!(top_half > 1100, "{} picked the top half {} times", selection, top_half);
        }
    }

    // Unevaluated individuals weigh nothing; all unevaluated falls back to uniform.
    #[test]
    fn test_fitness_proportional_ignores_infinite() {
        let mut rng = StdRng::seed_from_u64(5);
        let generation = sorted_generation(&[1.0, f64::INFINITY, f64::INFINITY]);
        for _ in 0..100 {
            assert_eq!(
                Selection::FitnessProportional.select(&generation, &mut rng),
                Some(0)
            );
        }
        let generation = sorted_generation(&[f64::INFINITY, f64::INFINITY]);
        assert!(Selection::FitnessProportional
            .select(&generation, &mut rng)
            .is_some());
    }

    #[test]
    fn test_selection_deserializes_tagged() {
        let selection: Selection = serde_json::from_str(r#"{"type":"Tournament"}"#).unwrap();
        assert_eq!(selection, Selection::Tournament { size: 3 });
        let selection: Selection =
            serde_json::from_str(r#"{"type":"LinearRank","pressure":1.5}"#).unwrap();
        assert_eq!(selection, Selection::LinearRank { pressure: 1.5 });
    }
}
