//! Artifacts written by the coordinator: JSON snapshots on shutdown and two
//! append-only CSV logs while running.

use crate::evolution::{GaParams, GenerationReport, GenerationSnapshot};
use crate::strategy::Strategy;
use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| PersistenceError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_error(path))
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let file = File::open(path).map_err(io_error(path))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| PersistenceError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_ga_params(path: &Path, params: &GaParams) -> Result<(), PersistenceError> {
    save_json(path, params)
}

pub fn save_simulation_params<T: Serialize>(path: &Path, params: &T) -> Result<(), PersistenceError> {
    save_json(path, params)
}

pub fn save_strategy(path: &Path, strategy: &Strategy) -> Result<(), PersistenceError> {
    save_json(path, strategy)
}

pub fn load_strategy(path: &Path) -> Result<Strategy, PersistenceError> {
    load_json(path)
}

pub fn save_generation(path: &Path, generation: &GenerationSnapshot) -> Result<(), PersistenceError> {
    save_json(path, generation)
}

pub fn load_generation(path: &Path) -> Result<GenerationSnapshot, PersistenceError> {
    load_json(path)
}

fn open_append(path: &Path) -> Result<(File, bool), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error(path))?;
    let empty = file.metadata().map_err(io_error(path))?.len() == 0;
    Ok((file, empty))
}

pub const STATISTICS_HEADER: &str = "generation,energyBest,fitnessBest,fitnessMin,fitnessMax,fitnessMedian,fitnessAvg,lengthAvg,similarityAvg,%invalid,lastChange";

/// One row per generation. The header goes in only when the file starts empty,
/// so runs can keep appending to the same log.
pub struct StatisticsLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl StatisticsLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let (file, empty) = open_append(&path)?;
        let mut writer = BufWriter::new(file);
        if empty {
            writeln!(writer, "{STATISTICS_HEADER}").map_err(io_error(&path))?;
        }
        Ok(StatisticsLog { path, writer })
    }

    pub fn append(&mut self, report: &GenerationReport) -> Result<(), PersistenceError> {
        let s = &report.statistics;
        let invalid_percent = if report.individuals == 0 {
            0.0
        } else {
            100.0 * s.invalid_count as f64 / report.individuals as f64
        };
        writeln!(
            self.writer,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.3},{:.6},{:.2},{}",
            report.generation,
            report.best_energy,
            report.best_fitness,
            s.fitness_min,
            s.fitness_max,
            s.fitness_median,
            s.fitness_avg,
            s.length_avg,
            s.similarity_avg,
            invalid_percent,
            s.last_change_generations
        )
        .map_err(io_error(&self.path))?;
        self.writer.flush().map_err(io_error(&self.path))
    }
}

/// One row of per-step map values each time the best improves.
pub struct BestTraceLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl BestTraceLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let (file, _) = open_append(&path)?;
        Ok(BestTraceLog {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn append(&mut self, generation: u64, best: &Strategy) -> Result<(), PersistenceError> {
        let maps = best.simulation.steps.iter().map(|step| step.map).join(",");
        writeln!(self.writer, "{generation},{maps}").map_err(io_error(&self.path))?;
        self.writer.flush().map_err(io_error(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::{BestRecord, Generation, GenerationTimings, Statistics};
    use crate::simulation::SimulationStep;
    use crate::strategy::{Action, ChangePoint};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cpga-{}-{}", uuid::Uuid::new_v4(), name))
    }

    fn report(generation: u64) -> GenerationReport {
        GenerationReport {
            generation,
            individuals: 4,
            capacity: 4,
            children: 4,
            mutations: 1,
            elites: 0,
            refilled: 0,
            degenerate: false,
            improved: true,
            statistics: Statistics {
                fitness_min: 1.0,
                fitness_max: 4.0,
                fitness_median: 3.0,
                fitness_avg: 2.5,
                length_avg: 3.0,
                similarity_avg: 0.5,
                invalid_count: 1,
                last_change_generations: 0,
            },
            best_fitness: 1.0,
            best_energy: 0.9,
            best_time: 30.0,
            timings: GenerationTimings::default(),
        }
    }

    // Test the header is written once across reopenings.
    #[test]
    fn test_statistics_header_written_once() {
        let path = temp_path("stats.csv");
        {
            let mut log = StatisticsLog::open(&path).unwrap();
            log.append(&report(0)).unwrap();
        }
        {
            let mut log = StatisticsLog::open(&path).unwrap();
            log.append(&report(1)).unwrap();
        }
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], STATISTICS_HEADER);
        assert!(lines[1].starts_with("0,0.900000,1.000000"), "Got {}", lines[1]);
        assert!(lines[2].ends_with(",25.00,0"), "Got {}", lines[2]);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_best_trace_row() {
        let path = temp_path("trace.csv");
        let mut best = Strategy::default();
        best.simulation.steps = vec![
            SimulationStep { map: 0, velocity: 1.0 },
            SimulationStep { map: 1, velocity: 1.0 },
            SimulationStep { map: 2, velocity: 1.0 },
        ];
        let mut log = BestTraceLog::open(&path).unwrap();
        log.append(7, &best).unwrap();
        drop(log);
        assert_eq!(fs::read_to_string(&path).unwrap(), "7,0,1,2\n");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_strategy_file_roundtrip() {
        let path = temp_path("best.json");
        let strategy = Strategy::new(vec![ChangePoint::new(4, Action::Accelerate)]);
        save_strategy(&path, &strategy).unwrap();
        let loaded = load_strategy(&path).unwrap();
        assert_eq!(loaded.change_points, strategy.change_points);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_missing_generation_fails() {
        let result = load_generation(Path::new("/nonexistent/generation.json"));
        assert!(matches!(result, Err(PersistenceError::Io { .. })));
    }

    // Test a generation with unevaluated individuals loads back: infinite
    // fitness statistics are written as null and read back as infinity.
    #[test]
    fn test_generation_with_infinite_statistics_loads() {
        let path = temp_path("generation.json");
        let strategies = [1.0, 2.0, f64::INFINITY]
            .into_iter()
            .map(|fitness| {
                let mut strategy = Strategy::new(vec![ChangePoint::new(1, Action::Coast)]);
                strategy.fitness = fitness;
                strategy
            })
            .collect();
        let mut generation = Generation::from_strategies(3, strategies);
        generation.sort_by_fitness();
        generation.update_statistics(&mut BestRecord::new()).unwrap();
        assert!(generation.statistics.fitness_max.is_infinite());

        save_generation(&path, &generation.snapshot()).unwrap();
        let loaded = load_generation(&path).unwrap();
        assert_eq!(loaded.individuals.len(), 3);
        assert_eq!(loaded.statistics.fitness_min, 1.0);
        assert_eq!(loaded.statistics.fitness_max, f64::INFINITY);
        assert_eq!(loaded.statistics.fitness_avg, f64::INFINITY);
        assert_eq!(loaded.individuals[2].fitness, f64::INFINITY);
        fs::remove_file(&path).ok();
    }
}
