use crate::evolution::generation::Generation;
use crate::evolution::selection::Selection;
use crate::strategy::{ChangePoint, Strategy, StrategyBounds};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Crossover {
    #[default]
    SinglePoint,
}

impl fmt::Display for Crossover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crossover::SinglePoint => write!(f, "single point"),
        }
    }
}

/// Swaps the tails of two parents at `cut`.
///
/// `cut` is clamped to each parent's length. Children are truncated to
/// `max_len` points and come out unevaluated.
pub fn single_point_crossover(
    parent_1: &Strategy,
    parent_2: &Strategy,
    cut: usize,
    max_len: usize,
) -> (Strategy, Strategy) {
    let (head_1, tail_1) = parent_1
        .change_points
        .split_at(cut.min(parent_1.change_points.len()));
    let (head_2, tail_2) = parent_2
        .change_points
        .split_at(cut.min(parent_2.change_points.len()));

    let child = |head: &[ChangePoint], tail: &[ChangePoint]| {
        let mut points = Vec::with_capacity((head.len() + tail.len()).min(max_len));
        points.extend(head.iter().chain(tail.iter()).take(max_len).copied());
        Strategy::new(points)
    };

    (child(head_1, tail_2), child(head_2, tail_1))
}

/// Fills `next` with children bred from `current` until it is full.
///
/// Returns the number of children written. Never pushes past capacity; when a
/// single slot remains only the first child is kept.
pub fn cross_over<R: Rng + ?Sized>(
    current: &Generation,
    next: &mut Generation,
    selection: &Selection,
    crossover: &Crossover,
    bounds: &StrategyBounds,
    rng: &mut R,
) -> usize {
    let mut produced = 0;

    while !next.is_full() {
        let (Some(i), Some(j)) = (
            selection.select(current, rng),
            selection.select(current, rng),
        ) else {
            break;
        };
        let (parent_1, parent_2) = (&current.individuals()[i], &current.individuals()[j]);

        let (child_1, child_2) = match crossover {
            Crossover::SinglePoint => {
                let cut = rng.gen_range(0..=parent_1.len().min(parent_2.len()));
                single_point_crossover(parent_1, parent_2, cut, bounds.max_change_points)
            }
        };

        for child in [child_1, child_2] {
            if next.push(child).is_err() {
                break;
            }
            produced += 1;
        }
    }

    produced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Action;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn points(positions: &[usize], action: Action) -> Strategy {
        Strategy::new(
            positions
                .iter()
                .map(|&p| ChangePoint::new(p, action))
                .collect(),
        )
    }

    #[test]
    fn test_single_point_swaps_tails() {
        let p1 = points(&[1, 2, 3, 4], Action::Accelerate);
        let p2 = points(&[10, 20, 30], Action::Brake);
        let (c1, c2) = single_point_crossover(&p1, &p2, 2, 48);
        let pos = |s: &Strategy| s.change_points.iter().map(|p| p.position).collect::<Vec<_>>();
        assert_eq!(pos(&c1), vec![1, 2, 30]);
        assert_eq!(pos(&c2), vec![10, 20, 3, 4]);
        assert!(c1.fitness.is_infinite(), "Children should be unevaluated");
    }

    #[test]
    fn test_children_truncated_to_capacity() {
        let p1 = points(&[1, 2], Action::Coast);
        let p2 = points(&[5, 6, 7, 8, 9, 10], Action::Coast);
        let (c1, c2) = single_point_crossover(&p1, &p2, 0, 3);
        assert_eq!(c1.len(), 3);
        assert_eq!(c2.len(), 2);
    }

    // Crossover never overfills next, whatever the capacity parity.
    #[test]
    fn test_cross_over_respects_capacity() {
        let mut rng = StdRng::seed_from_u64(9);
        let bounds = StrategyBounds::default();
        for capacity in [1, 2, 7, 10] {
            let mut current = Generation::random(capacity, &bounds, &mut rng);
            for (i, s) in current.individuals_mut().iter_mut().enumerate() {
                s.fitness = i as f64;
            }
            let mut next = Generation::empty(capacity);
            next.push(Strategy::default()).unwrap();

            let produced = cross_over(
                &current,
                &mut next,
                &Selection::default(),
                &Crossover::SinglePoint,
                &bounds,
                &mut rng,
            );
            assert_eq!(produced, capacity - 1, "Capacity {}", capacity);
            assert_eq!(next.len(), capacity);
        }
    }

    #[test]
    fn test_cross_over_from_empty_produces_nothing() {
        let mut rng = StdRng::seed_from_u64(9);
        let current = Generation::empty(4);
        let mut next = Generation::empty(4);
        let produced = cross_over(
            &current,
            &mut next,
            &Selection::Tournament { size: 2 },
            &Crossover::SinglePoint,
            &StrategyBounds::default(),
            &mut rng,
        );
        assert_eq!(produced, 0);
        assert!(next.is_empty());
    }
}
