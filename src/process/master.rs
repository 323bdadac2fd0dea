use crate::config::CoordinatorConfig;
use crate::console::{self, ConsoleCommand};
use crate::consts::{BEST_STRATEGY_FILE, GA_PARAMS_FILE, GENERATION_FILE, SIMULATION_PARAMS_FILE};
use crate::evolution::{EvolutionError, GenerationReport, GeneticAlgorithm};
use crate::persistence::{self, BestTraceLog, PersistenceError, StatisticsLog};
use crate::process::group::{ProcessGroup, ProcessGroupError};
use crate::process::worker::WorkerReport;
use crate::simulation::{FitnessFunction, KinematicSimulator, SimulationParams, Simulator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    Evolution(#[from] EvolutionError),
    #[error(transparent)]
    ProcessGroup(#[from] ProcessGroupError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Init,
    Running,
    Stopping,
    Terminated,
}

/// Summary handed back once every worker acknowledged its quit.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub run_id: Uuid,
    pub generations: u64,
    pub best_fitness: f64,
    pub state: CoordinatorState,
    pub workers: Vec<WorkerReport>,
}

/// Master side of a run: owns the engine and the process group, and is the
/// only place that talks to the console and the output files.
pub struct Coordinator {
    run_id: Uuid,
    engine: GeneticAlgorithm,
    group: ProcessGroup,
    config: CoordinatorConfig,
    run_flag: Arc<AtomicBool>,
    console: Option<mpsc::UnboundedReceiver<ConsoleCommand>>,
    statistics: Option<StatisticsLog>,
    best_trace: Option<BestTraceLog>,
    state: CoordinatorState,
    last_report: Option<GenerationReport>,
}

impl Coordinator {
    /// Builds the coordinator with the kinematic simulator and energy fitness
    /// described by `config`. Must run inside a tokio runtime.
    pub fn init(config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let simulator = Arc::new(KinematicSimulator::new(
            config.vehicle,
            &config.evolution.bounds,
        ));
        let fitness = Arc::new(config.fitness);
        Self::with_oracle(config, simulator, fitness)
    }

    pub fn with_oracle(
        config: CoordinatorConfig,
        simulator: Arc<dyn Simulator>,
        fitness: Arc<dyn FitnessFunction>,
    ) -> Result<Self, CoordinatorError> {
        let run_id = Uuid::new_v4();

        let initial = match &config.initial_population {
            Some(path) => {
                let snapshot = persistence::load_generation(path)?;
                info!(path = %path.display(), individuals = snapshot.individuals.len(), "Loaded initial population");
                snapshot.individuals
            }
            None => Vec::new(),
        };
        let engine = GeneticAlgorithm::with_initial_population(config.evolution.clone(), initial)?;

        let statistics = config
            .statistics_file
            .as_ref()
            .map(|path| StatisticsLog::open(path))
            .transpose()?;
        let best_trace = config
            .best_trace_file
            .as_ref()
            .map(|path| BestTraceLog::open(path))
            .transpose()?;

        let group = ProcessGroup::spawn(
            config.workers,
            config.threads_per_worker,
            config.shutdown_timeout(),
            simulator,
            fitness,
        )?;

        info!(
            %run_id,
            population = config.evolution.population_size,
            workers = group.world_size(),
            "Coordinator initialized"
        );

        Ok(Coordinator {
            run_id,
            engine,
            group,
            config,
            run_flag: Arc::new(AtomicBool::new(true)),
            console: None,
            statistics,
            best_trace,
            state: CoordinatorState::Init,
            last_report: None,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn engine(&self) -> &GeneticAlgorithm {
        &self.engine
    }

    pub fn last_report(&self) -> Option<&GenerationReport> {
        self.last_report.as_ref()
    }

    /// Clearing the flag stops the loop after the current generation.
    pub fn run_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.run_flag)
    }

    pub fn attach_console(&mut self, commands: mpsc::UnboundedReceiver<ConsoleCommand>) {
        self.console = Some(commands);
    }

    /// Runs generations until the run flag is cleared or `max_generations` is
    /// reached, then writes the final artifacts.
    pub async fn run(&mut self) -> Result<(), CoordinatorError> {
        self.state = CoordinatorState::Running;
        let context = self.config.context;

        while self.run_flag.load(Ordering::SeqCst) {
            if let Some(max) = self.config.max_generations {
                if self.engine.generation_count() >= max {
                    info!(generations = max, "Reached generation limit");
                    break;
                }
            }

            let report = match self.engine.advance_generation(&self.group, &context).await {
                Ok(report) => report,
                Err(error) => {
                    warn!(
                        generation = self.engine.generation_count(),
                        %error,
                        "Generation failed, saving artifacts before stopping"
                    );
                    self.state = CoordinatorState::Stopping;
                    if let Err(persist_error) = self.persist() {
                        warn!(%persist_error, "Could not save artifacts");
                    }
                    return Err(error.into());
                }
            };
            self.record(&report)?;
            self.last_report = Some(report);
            self.drain_console();
        }

        self.state = CoordinatorState::Stopping;
        self.persist()?;
        Ok(())
    }

    fn record(&mut self, report: &GenerationReport) -> Result<(), PersistenceError> {
        if let Some(log) = self.statistics.as_mut() {
            log.append(report)?;
        }
        if report.improved {
            debug!(
                generation = report.generation,
                fitness = report.best_fitness,
                "New best strategy"
            );
            if let Some(log) = self.best_trace.as_mut() {
                log.append(report.generation, &self.engine.best().strategy)?;
            }
        }

        let interval = self.config.report_interval;
        if interval > 0 && report.generation % interval == 0 {
            let s = &report.statistics;
            info!(
                generation = report.generation,
                best_fitness = report.best_fitness,
                best_energy = report.best_energy,
                fitness_avg = s.fitness_avg,
                fitness_median = s.fitness_median,
                invalid = s.invalid_count,
                last_change = s.last_change_generations,
                degenerate = report.degenerate,
                evaluation_ms = report.timings.evaluation.as_millis() as u64,
                total_ms = report.timings.total.as_millis() as u64,
                "Generation report"
            );
        }
        Ok(())
    }

    fn drain_console(&mut self) {
        let mut pending = Vec::new();
        let mut closed = false;
        if let Some(commands) = self.console.as_mut() {
            loop {
                match commands.try_recv() {
                    Ok(command) => pending.push(command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        }
        if closed {
            debug!("Console closed");
            self.console = None;
        }

        for command in pending {
            self.handle_command(command);
        }
    }

    pub fn handle_command(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Stop => {
                info!("Stop requested from console");
                self.run_flag.store(false, Ordering::SeqCst);
            }
            ConsoleCommand::ShowParams => println!("{}", self.engine.params()),
            ConsoleCommand::ShowStats => match &self.last_report {
                Some(report) => println!("{report}"),
                None => println!("No generation evaluated yet"),
            },
            ConsoleCommand::Help => println!("{}", console::HELP),
            ConsoleCommand::SetMutationRate { args } => {
                match console::set_mutation_rate(&mut self.engine, &args) {
                    Ok(()) => println!("{}", self.engine.params()),
                    Err(error) => warn!(code = error.code(), "{}", error),
                }
            }
        }
    }

    fn persist(&self) -> Result<(), PersistenceError> {
        let Some(dir) = &self.config.output_dir else {
            return Ok(());
        };

        persistence::save_ga_params(&dir.join(GA_PARAMS_FILE), &self.engine.params())?;
        persistence::save_simulation_params(
            &dir.join(SIMULATION_PARAMS_FILE),
            &SimulationParams {
                vehicle: self.config.vehicle,
                fitness: self.config.fitness,
                context: self.config.context,
                bounds: self.config.evolution.bounds,
            },
        )?;
        persistence::save_strategy(&dir.join(BEST_STRATEGY_FILE), &self.engine.best().strategy)?;
        persistence::save_generation(&dir.join(GENERATION_FILE), &self.engine.current().snapshot())?;

        info!(dir = %dir.display(), "Saved run artifacts");
        Ok(())
    }

    /// Sends the single `Quit` broadcast and waits for every worker. Consumes
    /// the coordinator so it cannot be used or torn down twice.
    pub async fn shutdown(self) -> Result<ShutdownReport, CoordinatorError> {
        let Coordinator {
            run_id,
            engine,
            group,
            statistics,
            best_trace,
            ..
        } = self;

        let workers = group.shutdown().await?;
        drop(statistics);
        drop(best_trace);

        info!(
            %run_id,
            generations = engine.generation_count(),
            best_fitness = engine.best().fitness(),
            "Coordinator terminated"
        );
        Ok(ShutdownReport {
            run_id,
            generations: engine.generation_count(),
            best_fitness: engine.best().fitness(),
            state: CoordinatorState::Terminated,
            workers,
        })
    }
}
