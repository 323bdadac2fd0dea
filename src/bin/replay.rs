use anyhow::{Context, Result};
use changepoint_ga::consts::{BEST_STRATEGY_FILE, SIMULATION_PARAMS_FILE};
use changepoint_ga::persistence::{load_json, load_strategy};
use changepoint_ga::simulation::{FitnessFunction, SimulationParams, Simulator};
use clap::{arg, value_parser, Command};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("cpga-replay")
        .about("Re-simulates a saved strategy and prints its trace")
        .arg(
            arg!(--dir <DIR> "Output directory of a finished run")
                .default_value("output")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(--strategy <PATH> "Strategy file, defaults to the run's best strategy")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(arg!(--trace "Print one line per simulated step"))
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    let dir = matches
        .get_one::<PathBuf>("dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("output"));
    let strategy_path = matches
        .get_one::<PathBuf>("strategy")
        .cloned()
        .unwrap_or_else(|| dir.join(BEST_STRATEGY_FILE));

    let params: SimulationParams = load_json(&dir.join(SIMULATION_PARAMS_FILE))
        .context("Loading simulation parameters")?;
    let mut strategy = load_strategy(&strategy_path).context("Loading strategy")?;
    info!(path = %strategy_path.display(), points = strategy.len(), "Replaying strategy");

    let saved_fitness = strategy.fitness;
    strategy.simulation = params.simulator().simulate(&strategy, &params.context);
    strategy.fitness = params.fitness.fitness(&strategy);

    println!("{strategy}");
    println!(
        "status {:?}, energy {:.3} kJ, time {:.2} s, progress {:.1}%",
        strategy.simulation.status,
        strategy.simulation.energy,
        strategy.simulation.time,
        100.0 * strategy.simulation.progress
    );
    if saved_fitness.is_finite() {
        println!(
            "fitness {:.3} (saved {:.3})",
            strategy.fitness, saved_fitness
        );
    }

    if matches.get_flag("trace") {
        for (step, sample) in strategy.simulation.steps.iter().enumerate() {
            println!("{step},{},{:.3}", sample.map, sample.velocity);
        }
    }
    Ok(())
}
