use crate::consts::{DEFAULT_REPORT_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT_SECS};
use crate::evolution::{Crossover, EvolutionError, MutationRate, RefillPolicy, Selection};
use crate::simulation::{EnergyFitness, SimulationContext, VehicleModel};
use crate::strategy::StrategyBounds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "CPGA_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn default_population_size() -> usize {
    100
}

fn default_elitism_rate() -> f64 {
    0.1
}

fn default_mutations() -> Vec<MutationRate> {
    MutationRate::default_table()
}

/// Parameters of the genetic algorithm itself.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EvolutionConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_elitism_rate")]
    pub elitism_rate: f64,
    #[serde(flatten)]
    pub refill: RefillPolicy,
    #[serde(default)]
    pub selection: Selection,
    #[serde(default)]
    pub crossover: Crossover,
    /// Applied in order, once each per generation.
    #[serde(default = "default_mutations")]
    pub mutations: Vec<MutationRate>,
    #[serde(default)]
    pub bounds: StrategyBounds,
    #[serde(default)]
    pub global_seed: Option<u64>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        EvolutionConfig {
            population_size: default_population_size(),
            elitism_rate: default_elitism_rate(),
            refill: RefillPolicy::default(),
            selection: Selection::default(),
            crossover: Crossover::default(),
            mutations: default_mutations(),
            bounds: StrategyBounds::default(),
            global_seed: None,
        }
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<(), EvolutionError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(EvolutionError::BadPopulationParameter(format!(
            "{name} must be in [0, 1], got {value}"
        )))
    }
}

impl EvolutionConfig {
    pub fn validate(&self) -> Result<(), EvolutionError> {
        if self.population_size == 0 {
            return Err(EvolutionError::BadPopulationParameter(
                "Population size cannot be zero".into(),
            ));
        }
        if self.bounds.track_steps == 0 {
            return Err(EvolutionError::BadPopulationParameter(
                "Track must have at least one step".into(),
            ));
        }
        if self.bounds.max_change_points == 0 {
            return Err(EvolutionError::BadPopulationParameter(
                "Strategies must hold at least one change point".into(),
            ));
        }
        check_unit_interval("Elitism rate", self.elitism_rate)?;
        check_unit_interval("Refill ratio", self.refill.refill_ratio)?;
        check_unit_interval("Invalid threshold", self.refill.invalid_threshold)?;
        for row in &self.mutations {
            check_unit_interval(&format!("Rate of {}", row.mutation), row.rate)?;
        }
        match self.selection {
            Selection::Tournament { size: 0 } => Err(EvolutionError::BadPopulationParameter(
                "Tournament size cannot be zero".into(),
            )),
            Selection::LinearRank { pressure } if !(1.0..=2.0).contains(&pressure) => {
                Err(EvolutionError::BadPopulationParameter(format!(
                    "Selection pressure must be in [1, 2], got {pressure}"
                )))
            }
            _ => Ok(()),
        }
    }
}

fn default_workers() -> usize {
    (num_cpus::get() / 2).max(1)
}

fn default_threads_per_worker() -> usize {
    2
}

fn default_report_interval() -> u64 {
    DEFAULT_REPORT_INTERVAL
}

fn default_output_dir() -> Option<PathBuf> {
    Some(PathBuf::from("output"))
}

fn default_shutdown_timeout_secs() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

/// Everything the coordinator needs to run: engine, oracle, process group
/// shape and output locations.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub vehicle: VehicleModel,
    #[serde(default)]
    pub fitness: EnergyFitness,
    #[serde(default)]
    pub context: SimulationContext,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_threads_per_worker")]
    pub threads_per_worker: usize,
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
    /// Runs until stopped from the console (or Ctrl-C) when unset.
    #[serde(default)]
    pub max_generations: Option<u64>,
    /// Artifacts are only written when set.
    #[serde(default = "default_output_dir")]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub statistics_file: Option<PathBuf>,
    #[serde(default)]
    pub best_trace_file: Option<PathBuf>,
    /// Saved generation to start from instead of a random one.
    #[serde(default)]
    pub initial_population: Option<PathBuf>,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            evolution: EvolutionConfig::default(),
            vehicle: VehicleModel::default(),
            fitness: EnergyFitness::default(),
            context: SimulationContext::default(),
            workers: default_workers(),
            threads_per_worker: default_threads_per_worker(),
            report_interval: default_report_interval(),
            max_generations: None,
            output_dir: default_output_dir(),
            statistics_file: None,
            best_trace_file: None,
            initial_population: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads the file named by `CPGA_CONFIG`, defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
