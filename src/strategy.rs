use crate::consts::{
    DEFAULT_INITIAL_CHANGE_POINTS, DEFAULT_MAX_CHANGE_POINTS, DEFAULT_TRACK_STEPS,
};
use crate::simulation::SimulationResult;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Control action applied from a change point onwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Accelerate,
    Coast,
    Brake,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Accelerate, Action::Coast, Action::Brake];

    /// Numeric map value recorded in simulation traces.
    pub fn map_value(self) -> u8 {
        match self {
            Action::Accelerate => 0,
            Action::Coast => 1,
            Action::Brake => 2,
        }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    /// Picks an action different from `self`.
    pub fn random_other<R: Rng + ?Sized>(self, rng: &mut R) -> Self {
        let others: Vec<Action> = Self::ALL.into_iter().filter(|a| *a != self).collect();
        others[rng.gen_range(0..others.len())]
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Accelerate => "ACC",
            Action::Coast => "CST",
            Action::Brake => "BRK",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePoint {
    /// Step index along the track, in `[0, track_steps)`.
    pub position: usize,
    pub action: Action,
}

impl ChangePoint {
    pub fn new(position: usize, action: Action) -> Self {
        ChangePoint { position, action }
    }

    pub fn random<R: Rng + ?Sized>(bounds: &StrategyBounds, rng: &mut R) -> Self {
        ChangePoint {
            position: bounds.random_position(rng),
            action: Action::random(rng),
        }
    }
}

fn default_track_steps() -> usize {
    DEFAULT_TRACK_STEPS
}

fn default_max_change_points() -> usize {
    DEFAULT_MAX_CHANGE_POINTS
}

fn default_initial_change_points() -> usize {
    DEFAULT_INITIAL_CHANGE_POINTS
}

/// Domain every strategy lives in: valid positions and the sequence capacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyBounds {
    #[serde(default = "default_track_steps")]
    pub track_steps: usize,
    #[serde(default = "default_max_change_points")]
    pub max_change_points: usize,
    #[serde(default = "default_initial_change_points")]
    pub initial_change_points: usize,
}

impl Default for StrategyBounds {
    fn default() -> Self {
        StrategyBounds {
            track_steps: DEFAULT_TRACK_STEPS,
            max_change_points: DEFAULT_MAX_CHANGE_POINTS,
            initial_change_points: DEFAULT_INITIAL_CHANGE_POINTS,
        }
    }
}

impl StrategyBounds {
    pub fn random_position<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        rng.gen_range(0..self.track_steps.max(1))
    }
}

/// Non-finite fitness values (the "not evaluated yet" marker) are written as
/// `null` since JSON has no infinity.
pub(crate) mod fitness_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// One candidate solution: change points plus whatever the last evaluation
/// pass cached about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub change_points: Vec<ChangePoint>,
    /// Lower is better. `f64::INFINITY` until evaluated.
    #[serde(with = "fitness_serde")]
    pub fitness: f64,
    /// Closeness to the historical best, in `[0, 1]`.
    pub similarity: f64,
    pub simulation: SimulationResult,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::new(Vec::new())
    }
}

impl Strategy {
    pub fn new(change_points: Vec<ChangePoint>) -> Self {
        Strategy {
            change_points,
            fitness: f64::INFINITY,
            similarity: 0.0,
            simulation: SimulationResult::default(),
        }
    }

    /// Random strategy with at least one and at most `initial_change_points`
    /// points, ordered by position.
    pub fn random<R: Rng + ?Sized>(bounds: &StrategyBounds, rng: &mut R) -> Self {
        let upper = bounds
            .initial_change_points
            .min(bounds.max_change_points)
            .max(1);
        let length = rng.gen_range(1..=upper);
        let mut change_points: Vec<ChangePoint> = (0..length)
            .map(|_| ChangePoint::random(bounds, rng))
            .collect();
        change_points.sort_by_key(|point| point.position);
        Strategy::new(change_points)
    }

    pub fn len(&self) -> usize {
        self.change_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.change_points.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.simulation.status.is_ok()
    }

    /// Drops the cached evaluation so the strategy reads as "never simulated".
    pub fn reset_evaluation(&mut self) {
        self.fitness = f64::INFINITY;
        self.similarity = 0.0;
        self.simulation = SimulationResult::default();
    }

    /// Fraction of simulated steps whose map value matches `best` at the same
    /// step. Zero when `best` has no trace to compare against.
    pub fn similarity_to(&self, best: &Strategy) -> f64 {
        let ours = &self.simulation.steps;
        let theirs = &best.simulation.steps;
        let longest = ours.len().max(theirs.len());
        if theirs.is_empty() || longest == 0 {
            return 0.0;
        }

        let matching = ours
            .iter()
            .zip(theirs.iter())
            .filter(|(a, b)| a.map == b.map)
            .count();
        matching as f64 / longest as f64
    }

    pub fn compare_fitness(&self, other: &Strategy) -> Ordering {
        self.fitness.total_cmp(&other.fitness)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.2}]", self.fitness)?;
        for point in &self.change_points {
            write!(f, " {}:{}", point.position, point.action)?;
        }
        Ok(())
    }
}
