//! Simulation oracle used by fitness evaluation.
//!
//! The genetic algorithm only needs two things from here: a [`Simulator`] that
//! turns a strategy into a [`SimulationResult`], and a [`FitnessFunction`]
//! that turns the simulated strategy into a scalar cost. [`KinematicSimulator`]
//! is a deliberately small point-mass vehicle model so the whole pipeline can
//! run without an external physics package.

use crate::strategy::{Action, Strategy, StrategyBounds};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimulationStatus {
    /// Never simulated (fresh child, random individual, ...).
    #[default]
    Pending,
    Ok,
    /// Velocity dropped below the vehicle's minimum before the end of the track.
    Stalled,
    /// Took longer than the vehicle's time budget.
    Timeout,
}

impl SimulationStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, SimulationStatus::Ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationStep {
    pub map: u8,
    pub velocity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub status: SimulationStatus,
    /// Energy spent, in kJ.
    pub energy: f64,
    /// Elapsed time, in seconds.
    pub time: f64,
    /// Fraction of the track covered, in `[0, 1]`.
    pub progress: f64,
    pub steps: Vec<SimulationStep>,
}

/// Starting conditions shared by every individual of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationContext {
    pub start_velocity: f64,
    pub start_map: Action,
}

impl Default for SimulationContext {
    fn default() -> Self {
        SimulationContext {
            start_velocity: 10.0,
            start_map: Action::Coast,
        }
    }
}

pub trait Simulator: Send + Sync {
    fn simulate(&self, strategy: &Strategy, context: &SimulationContext) -> SimulationResult;
}

pub trait FitnessFunction: Send + Sync {
    /// Scalar cost of an already simulated strategy. Lower is better.
    fn fitness(&self, strategy: &Strategy) -> f64;
}

fn default_step_length() -> f64 {
    10.0
}
fn default_acceleration() -> f64 {
    0.8
}
fn default_braking() -> f64 {
    1.5
}
fn default_drag() -> f64 {
    0.06
}
fn default_mass() -> f64 {
    1200.0
}
fn default_efficiency() -> f64 {
    0.85
}
fn default_max_velocity() -> f64 {
    35.0
}
fn default_min_velocity() -> f64 {
    0.5
}
fn default_max_time() -> f64 {
    420.0
}

/// Parameters of the point-mass vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleModel {
    /// Metres covered by one track step.
    #[serde(default = "default_step_length")]
    pub step_length: f64,
    /// m/s^2 while accelerating.
    #[serde(default = "default_acceleration")]
    pub acceleration: f64,
    /// m/s^2 while braking.
    #[serde(default = "default_braking")]
    pub braking: f64,
    /// m/s^2 lost to rolling resistance in every mode.
    #[serde(default = "default_drag")]
    pub drag: f64,
    #[serde(default = "default_mass")]
    pub mass: f64,
    #[serde(default = "default_efficiency")]
    pub efficiency: f64,
    #[serde(default = "default_max_velocity")]
    pub max_velocity: f64,
    #[serde(default = "default_min_velocity")]
    pub min_velocity: f64,
    /// Seconds allowed to finish the track.
    #[serde(default = "default_max_time")]
    pub max_time: f64,
}

impl Default for VehicleModel {
    fn default() -> Self {
        VehicleModel {
            step_length: default_step_length(),
            acceleration: default_acceleration(),
            braking: default_braking(),
            drag: default_drag(),
            mass: default_mass(),
            efficiency: default_efficiency(),
            max_velocity: default_max_velocity(),
            min_velocity: default_min_velocity(),
            max_time: default_max_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinematicSimulator {
    pub vehicle: VehicleModel,
    pub track_steps: usize,
}

impl KinematicSimulator {
    pub fn new(vehicle: VehicleModel, bounds: &StrategyBounds) -> Self {
        KinematicSimulator {
            vehicle,
            track_steps: bounds.track_steps,
        }
    }

    fn net_acceleration(&self, map: Action) -> f64 {
        let v = &self.vehicle;
        match map {
            Action::Accelerate => v.acceleration - v.drag,
            Action::Coast => -v.drag,
            Action::Brake => -v.braking - v.drag,
        }
    }
}

impl Simulator for KinematicSimulator {
    fn simulate(&self, strategy: &Strategy, context: &SimulationContext) -> SimulationResult {
        let vehicle = &self.vehicle;
        let ds = vehicle.step_length;

        // Later points on the same step win, matching what the filter keeps.
        let mut actions: Vec<Option<Action>> = vec![None; self.track_steps];
        for point in &strategy.change_points {
            if let Some(slot) = actions.get_mut(point.position) {
                *slot = Some(point.action);
            }
        }

        let mut map = context.start_map;
        let mut velocity = context.start_velocity.max(0.0);
        let mut result = SimulationResult {
            status: SimulationStatus::Ok,
            steps: Vec::with_capacity(self.track_steps),
            ..Default::default()
        };

        for (step, action) in actions.iter().enumerate() {
            if let Some(action) = action {
                map = *action;
            }

            let v_squared = velocity * velocity + 2.0 * self.net_acceleration(map) * ds;
            let next_velocity = if v_squared > 0.0 {
                v_squared.sqrt().min(vehicle.max_velocity)
            } else {
                0.0
            };

            if next_velocity < vehicle.min_velocity {
                result.status = SimulationStatus::Stalled;
                result.steps.push(SimulationStep {
                    map: map.map_value(),
                    velocity: next_velocity,
                });
                result.progress = step as f64 / self.track_steps as f64;
                return result;
            }

            result.time += ds / (0.5 * (velocity + next_velocity));
            if map == Action::Accelerate {
                result.energy +=
                    vehicle.mass * vehicle.acceleration * ds / vehicle.efficiency / 1000.0;
            }
            velocity = next_velocity;
            result.steps.push(SimulationStep {
                map: map.map_value(),
                velocity,
            });
            result.progress = (step + 1) as f64 / self.track_steps as f64;

            if result.time > vehicle.max_time {
                result.status = SimulationStatus::Timeout;
                return result;
            }
        }

        result
    }
}

fn default_invalid_penalty() -> f64 {
    10_000.0
}

/// Energy based cost: energy, plus a penalty scaled by how much of the track an
/// invalid run failed to cover, plus optional time and similarity terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyFitness {
    #[serde(default = "default_invalid_penalty")]
    pub invalid_penalty: f64,
    /// kJ per second of elapsed time.
    #[serde(default)]
    pub time_weight: f64,
    /// Penalises closeness to the historical best to keep the population diverse.
    #[serde(default)]
    pub similarity_weight: f64,
}

impl Default for EnergyFitness {
    fn default() -> Self {
        EnergyFitness {
            invalid_penalty: default_invalid_penalty(),
            time_weight: 0.0,
            similarity_weight: 0.0,
        }
    }
}

impl FitnessFunction for EnergyFitness {
    fn fitness(&self, strategy: &Strategy) -> f64 {
        let simulation = &strategy.simulation;
        let mut cost = simulation.energy + self.time_weight * simulation.time;
        if !simulation.status.is_ok() {
            cost += self.invalid_penalty * (2.0 - simulation.progress.clamp(0.0, 1.0));
        }
        cost * (1.0 + self.similarity_weight * strategy.similarity)
    }
}

/// Everything needed to re-run a saved strategy outside of a GA run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParams {
    pub vehicle: VehicleModel,
    pub fitness: EnergyFitness,
    pub context: SimulationContext,
    pub bounds: StrategyBounds,
}

impl SimulationParams {
    pub fn simulator(&self) -> KinematicSimulator {
        KinematicSimulator::new(self.vehicle, &self.bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::ChangePoint;

    fn simulator(track_steps: usize) -> KinematicSimulator {
        KinematicSimulator::new(
            VehicleModel::default(),
            &StrategyBounds {
                track_steps,
                ..Default::default()
            },
        )
    }

    // Coasting the whole way from a low speed should stall.
    #[test]
    fn test_coasting_from_low_speed_stalls() {
        let context = SimulationContext {
            start_velocity: 2.0,
            start_map: Action::Coast,
        };
        let result = simulator(400).simulate(&Strategy::default(), &context);
        assert_eq!(result.status, SimulationStatus::Stalled);
        assert!(result.progress < 1.0);
        assert_eq!(result.energy, 0.0, "Coasting should not spend energy");
    }

    // Accelerate then coast covers a short track and records one step per position.
    #[test]
    fn test_short_track_completes() {
        let strategy = Strategy::new(vec![
            ChangePoint::new(0, Action::Accelerate),
            ChangePoint::new(10, Action::Coast),
        ]);
        let result = simulator(40).simulate(&strategy, &SimulationContext::default());
        assert_eq!(result.status, SimulationStatus::Ok);
        assert_eq!(result.steps.len(), 40);
        assert_eq!(result.steps[0].map, Action::Accelerate.map_value());
        assert_eq!(result.steps[39].map, Action::Coast.map_value());
        assert!(result.energy > 0.0);
        assert!((result.progress - 1.0).abs() < 1e-12);
    }

    // Invalid runs cost more than any valid run of similar energy.
    #[test]
    fn test_invalid_run_is_penalised() {
        let fitness = EnergyFitness::default();
        let mut valid = Strategy::default();
        valid.simulation.status = SimulationStatus::Ok;
        valid.simulation.energy = 500.0;
        let mut invalid = valid.clone();
        invalid.simulation.status = SimulationStatus::Stalled;
        invalid.simulation.progress = 0.9;
        assert!(fitness.fitness(&invalid) > fitness.fitness(&valid));
        assert_eq!(fitness.fitness(&valid), 500.0);
    }
}
