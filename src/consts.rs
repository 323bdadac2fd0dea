// Shared constants. Anything an operator might want to tune lives in the
// config structs instead; these are the fallbacks those configs default to.

/// Length of the track in simulation steps (one change point position per step).
pub const DEFAULT_TRACK_STEPS: usize = 400;
/// Capacity bound of a change point sequence.
pub const DEFAULT_MAX_CHANGE_POINTS: usize = 48;
/// Upper bound for the number of points a freshly generated strategy starts with.
pub const DEFAULT_INITIAL_CHANGE_POINTS: usize = 12;

pub const DEFAULT_TOURNAMENT_SIZE: usize = 3;
pub const DEFAULT_SELECTION_PRESSURE: f64 = 1.8;

pub const DEFAULT_REPORT_INTERVAL: u64 = 10;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// Artifact names written on shutdown
pub const GA_PARAMS_FILE: &str = "ga_params.json";
pub const SIMULATION_PARAMS_FILE: &str = "simulation.json";
pub const BEST_STRATEGY_FILE: &str = "best_strategy.json";
pub const GENERATION_FILE: &str = "generation.json";
