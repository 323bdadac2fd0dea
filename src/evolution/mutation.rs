use crate::evolution::generation::Generation;
use crate::strategy::{ChangePoint, Strategy, StrategyBounds};
use itertools::Itertools;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// In-place edits of a single strategy. All of them keep positions inside the
/// track and lengths under `max_change_points`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    AddPoint,
    RemovePoint,
    MovePoint,
    ChangeAction,
    Filter,
}

impl Mutation {
    /// Returns whether the strategy was actually touched.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        strategy: &mut Strategy,
        bounds: &StrategyBounds,
        rng: &mut R,
    ) -> bool {
        match self {
            Mutation::AddPoint => add_random_change_point(strategy, bounds, rng),
            Mutation::RemovePoint => remove_random_change_point(strategy, rng),
            Mutation::MovePoint => move_random_change_point(strategy, bounds, rng),
            Mutation::ChangeAction => change_random_change_point_action(strategy, rng),
            Mutation::Filter => filter_strategy(strategy),
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mutation::AddPoint => "add point",
            Mutation::RemovePoint => "remove point",
            Mutation::MovePoint => "move point",
            Mutation::ChangeAction => "change action",
            Mutation::Filter => "filter",
        };
        write!(f, "{name}")
    }
}

/// One row of the engine's mutation table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MutationRate {
    pub mutation: Mutation,
    pub rate: f64,
}

impl MutationRate {
    pub fn new(mutation: Mutation, rate: f64) -> Self {
        MutationRate { mutation, rate }
    }

    pub fn default_table() -> Vec<MutationRate> {
        vec![
            MutationRate::new(Mutation::AddPoint, 0.05),
            MutationRate::new(Mutation::RemovePoint, 0.05),
            MutationRate::new(Mutation::MovePoint, 0.1),
            MutationRate::new(Mutation::ChangeAction, 0.1),
            MutationRate::new(Mutation::Filter, 0.02),
        ]
    }
}

pub fn add_random_change_point<R: Rng + ?Sized>(
    strategy: &mut Strategy,
    bounds: &StrategyBounds,
    rng: &mut R,
) -> bool {
    if strategy.len() >= bounds.max_change_points {
        return false;
    }
    let index = rng.gen_range(0..=strategy.len());
    strategy
        .change_points
        .insert(index, ChangePoint::random(bounds, rng));
    true
}

pub fn remove_random_change_point<R: Rng + ?Sized>(strategy: &mut Strategy, rng: &mut R) -> bool {
    if strategy.is_empty() {
        return false;
    }
    let index = rng.gen_range(0..strategy.len());
    strategy.change_points.remove(index);
    true
}

pub fn move_random_change_point<R: Rng + ?Sized>(
    strategy: &mut Strategy,
    bounds: &StrategyBounds,
    rng: &mut R,
) -> bool {
    if strategy.is_empty() {
        return false;
    }
    let index = rng.gen_range(0..strategy.len());
    strategy.change_points[index].position = bounds.random_position(rng);
    true
}

pub fn change_random_change_point_action<R: Rng + ?Sized>(
    strategy: &mut Strategy,
    rng: &mut R,
) -> bool {
    if strategy.is_empty() {
        return false;
    }
    let index = rng.gen_range(0..strategy.len());
    let point = &mut strategy.change_points[index];
    point.action = point.action.random_other(rng);
    true
}

/// Canonical form: ordered by position, one point per position (the last one
/// given), and no point that repeats the action already in effect.
pub fn filter_strategy(strategy: &mut Strategy) -> bool {
    let before = strategy.change_points.clone();

    // Stable, so equal positions keep their relative order for the coalesce.
    strategy.change_points.sort_by_key(|point| point.position);
    let mut filtered: Vec<ChangePoint> = strategy
        .change_points
        .drain(..)
        .coalesce(|a, b| {
            if a.position == b.position {
                Ok(b)
            } else {
                Err((a, b))
            }
        })
        .collect();
    filtered.dedup_by(|later, earlier| later.action == earlier.action);
    strategy.change_points = filtered;

    strategy.change_points != before
}

/// Applies `mutation` to every occupied slot of `next` with probability
/// `rate`. Mutated individuals lose their cached evaluation.
///
/// # Returns
/// Number of individuals mutated. `next.len()` is left unchanged.
pub fn mutation<R: Rng + ?Sized>(
    next: &mut Generation,
    mutation: &Mutation,
    rate: f64,
    bounds: &StrategyBounds,
    rng: &mut R,
) -> usize {
    let rate = if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut mutated = 0;
    for strategy in next.individuals_mut() {
        if rng.gen_bool(rate) && mutation.apply(strategy, bounds, rng) {
            strategy.reset_evaluation();
            mutated += 1;
        }
    }
    mutated
}
