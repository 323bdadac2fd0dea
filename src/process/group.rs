use crate::evolution::{EvolutionError, Generation, PopulationEvaluator};
use crate::process::protocol::{Message, Shard, ShardResult};
use crate::process::worker::{Worker, WorkerReport};
use crate::simulation::{FitnessFunction, SimulationContext, Simulator};
use crate::strategy::Strategy;
use futures::{future::BoxFuture, FutureExt};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 4;

#[derive(Error, Debug)]
pub enum ProcessGroupError {
    #[error("Process group needs at least one worker")]
    NoWorkers,
    #[error("Could not build the thread pool of worker {rank}: {source}")]
    ThreadPool {
        rank: usize,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
    #[error("Could not deliver command to worker {rank}")]
    Delivery { rank: usize },
    #[error("Worker {rank} dropped its shard without replying")]
    MissingReply { rank: usize },
    #[error("Worker {rank} returned {got} strategies for a shard of {expected}")]
    ShardMismatch {
        rank: usize,
        expected: usize,
        got: usize,
    },
    #[error("Worker {rank} did not acknowledge quit within {timeout:?}")]
    WorkerTimeout { rank: usize, timeout: Duration },
    #[error("Worker {rank} panicked")]
    WorkerPanicked { rank: usize },
}

struct WorkerLink {
    rank: usize,
    sender: mpsc::Sender<Message>,
    handle: JoinHandle<WorkerReport>,
}

/// Fixed set of workers, each with its own command channel and rayon pool.
///
/// Dropping the group without [`ProcessGroup::shutdown`] closes every channel,
/// so workers still exit, just without their quit acknowledgement.
pub struct ProcessGroup {
    links: Vec<WorkerLink>,
    shutdown_timeout: Duration,
}

/// Splits `len` items into `workers` contiguous ranges. Trailing ranges may be
/// empty but every worker gets one.
pub fn shard_ranges(len: usize, workers: usize) -> Vec<Range<usize>> {
    if workers == 0 {
        return Vec::new();
    }
    let chunk = len.div_ceil(workers);
    (0..workers)
        .map(|rank| {
            let start = (rank * chunk).min(len);
            let end = (start + chunk).min(len);
            start..end
        })
        .collect()
}

impl ProcessGroup {
    /// Spawns `workers` worker tasks on the current tokio runtime.
    pub fn spawn(
        workers: usize,
        threads_per_worker: usize,
        shutdown_timeout: Duration,
        simulator: Arc<dyn Simulator>,
        fitness: Arc<dyn FitnessFunction>,
    ) -> Result<Self, ProcessGroupError> {
        if workers == 0 {
            return Err(ProcessGroupError::NoWorkers);
        }

        let mut links = Vec::with_capacity(workers);
        for rank in 0..workers {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads_per_worker.max(1))
                .thread_name(move |index| format!("cpga-worker-{rank}-{index}"))
                .build()
                .map_err(|source| ProcessGroupError::ThreadPool { rank, source })?;

            let (sender, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
            let worker = Worker {
                rank,
                pool: Arc::new(pool),
                simulator: Arc::clone(&simulator),
                fitness: Arc::clone(&fitness),
            };
            links.push(WorkerLink {
                rank,
                sender,
                handle: tokio::spawn(worker.run(receiver)),
            });
        }

        info!(workers, threads_per_worker, "Process group started");
        Ok(ProcessGroup {
            links,
            shutdown_timeout,
        })
    }

    pub fn world_size(&self) -> usize {
        self.links.len()
    }

    /// Scatters `generation` over the workers and waits for every shard.
    ///
    /// Every worker receives an `Evaluate`, even with an empty shard, so the
    /// call is a barrier over the whole group. Workers get copies: a shard
    /// that is lost leaves its slots as they were, and every shard that did
    /// come back is written before the first error is returned.
    pub async fn evaluate_generation(
        &self,
        generation: &mut Generation,
        best: &Strategy,
        context: &SimulationContext,
    ) -> Result<(), ProcessGroupError> {
        let best = Arc::new(best.clone());
        let ranges = shard_ranges(generation.len(), self.world_size());
        let individuals = generation.individuals_mut();

        let mut first_error = None;
        let mut replies = Vec::with_capacity(ranges.len());
        for (link, range) in self.links.iter().zip(ranges) {
            let rank = link.rank;
            let expected = range.len();
            let (reply, answer) = oneshot::channel::<ShardResult>();
            let shard = Shard {
                offset: range.start,
                strategies: individuals[range].to_vec(),
                best: Arc::clone(&best),
                context: *context,
            };

            if link
                .sender
                .send(Message::Evaluate { shard, reply })
                .await
                .is_err()
            {
                warn!(rank, "Could not deliver shard");
                first_error.get_or_insert(ProcessGroupError::Delivery { rank });
                continue;
            }
            replies.push(answer.map(move |result| {
                let result = result.map_err(|_| ProcessGroupError::MissingReply { rank })?;
                if result.strategies.len() != expected {
                    return Err(ProcessGroupError::ShardMismatch {
                        rank,
                        expected,
                        got: result.strategies.len(),
                    });
                }
                Ok(result)
            }));
        }

        for result in futures::future::join_all(replies).await {
            match result {
                Ok(result) => {
                    let slots =
                        &mut individuals[result.offset..result.offset + result.strategies.len()];
                    for (slot, strategy) in slots.iter_mut().zip(result.strategies) {
                        *slot = strategy;
                    }
                }
                Err(error) => {
                    warn!(%error, "Shard kept unevaluated");
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Broadcasts a single `Quit` to every worker and waits for each to stop.
    ///
    /// Every worker is attempted even after a failure; the first failure is
    /// returned once all of them were dealt with.
    pub async fn shutdown(self) -> Result<Vec<WorkerReport>, ProcessGroupError> {
        let deadline = self.shutdown_timeout;
        let mut first_error = None;

        for link in &self.links {
            let delivered = matches!(
                timeout(deadline, link.sender.send(Message::Quit)).await,
                Ok(Ok(()))
            );
            if !delivered {
                warn!(rank = link.rank, "Could not deliver quit");
                first_error.get_or_insert(ProcessGroupError::Delivery { rank: link.rank });
            }
        }

        let mut reports = Vec::with_capacity(self.links.len());
        for WorkerLink {
            rank,
            sender,
            mut handle,
        } in self.links
        {
            match timeout(deadline, &mut handle).await {
                Ok(Ok(report)) => {
                    debug!(rank, quit_commands = report.quit_commands, "Worker acknowledged quit");
                    reports.push(report);
                }
                Ok(Err(error)) => {
                    warn!(rank, %error, "Worker task failed");
                    first_error.get_or_insert(ProcessGroupError::WorkerPanicked { rank });
                }
                Err(_) => {
                    warn!(rank, ?deadline, "Worker did not stop in time, aborting it");
                    handle.abort();
                    first_error.get_or_insert(ProcessGroupError::WorkerTimeout {
                        rank,
                        timeout: deadline,
                    });
                }
            }
            drop(sender);
        }

        match first_error {
            Some(error) => Err(error),
            None => {
                info!(workers = reports.len(), "Process group stopped");
                Ok(reports)
            }
        }
    }
}

impl PopulationEvaluator for ProcessGroup {
    fn evaluate<'a>(
        &'a self,
        generation: &'a mut Generation,
        best: &'a Strategy,
        context: &'a SimulationContext,
    ) -> BoxFuture<'a, Result<(), EvolutionError>> {
        async move {
            self.evaluate_generation(generation, best, context)
                .await
                .map_err(|error| EvolutionError::Evaluation(error.to_string()))
        }
        .boxed()
    }
}
