use anyhow::{Context, Result};
use changepoint_ga::config::{CoordinatorConfig, CONFIG_ENV_VAR};
use changepoint_ga::console::{self, ConsoleCommand};
use changepoint_ga::process::Coordinator;
use clap::{arg, value_parser, Command};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("cpga")
        .about("Evolves change point driving strategies over a pool of workers")
        .arg(
            arg!(--config <PATH> "JSON config file, falls back to $CPGA_CONFIG")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(--workers <N> "Number of workers in the process group")
                .required(false)
                .value_parser(value_parser!(usize)),
        )
        .arg(
            arg!(--generations <N> "Stop after this many generations")
                .required(false)
                .value_parser(value_parser!(u64)),
        )
        .arg(
            arg!(--output <DIR> "Directory for the final artifacts")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(arg!(--"no-console" "Do not read commands from stdin"))
}

/// Forwards parsed stdin lines to the coordinator until stdin closes.
// Plain thread: tokio's stdin keeps the runtime from shutting down while a read is pending.
fn spawn_console() -> mpsc::UnboundedReceiver<ConsoleCommand> {
    let (sender, receiver) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(error) => {
                    warn!(%error, "Could not read stdin");
                    break;
                }
            };
            match console::parse_line(&line) {
                Ok(Some(command)) => {
                    if sender.send(command).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(error) => warn!(code = error.code(), "{}", error),
            }
        }
    });
    receiver
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => CoordinatorConfig::from_file(path)?,
        None => CoordinatorConfig::from_env()
            .with_context(|| format!("Loading config named by {CONFIG_ENV_VAR}"))?,
    };
    if let Some(&workers) = matches.get_one::<usize>("workers") {
        config.workers = workers;
    }
    if let Some(&generations) = matches.get_one::<u64>("generations") {
        config.max_generations = Some(generations);
    }
    if let Some(output) = matches.get_one::<PathBuf>("output") {
        config.output_dir = Some(output.clone());
    }

    let mut coordinator = Coordinator::init(config).context("Starting coordinator")?;
    if !matches.get_flag("no-console") {
        coordinator.attach_console(spawn_console());
    }

    let run_flag = coordinator.run_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping after the current generation");
            run_flag.store(false, Ordering::SeqCst);
        }
    });

    // Workers are released even when the run itself failed.
    let run_result = coordinator.run().await;
    let shutdown = coordinator.shutdown().await;
    run_result.context("Run failed")?;
    let report = shutdown.context("Shutdown failed")?;

    info!(
        run_id = %report.run_id,
        generations = report.generations,
        best_fitness = report.best_fitness,
        "Done"
    );
    Ok(())
}
