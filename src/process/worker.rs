use crate::evolution::evaluate_strategies;
use crate::process::protocol::{Message, Shard, ShardResult};
use crate::simulation::{FitnessFunction, Simulator};
use crate::strategy::Strategy;
use rayon::ThreadPool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Returned by a worker task once it stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub rank: usize,
    pub shards_evaluated: usize,
    pub strategies_evaluated: usize,
    /// How many `Quit` commands the worker saw. One after a clean shutdown,
    /// zero if the coordinator went away without sending it.
    pub quit_commands: usize,
}

/// Everything a worker needs besides its command channel.
pub struct Worker {
    pub rank: usize,
    pub pool: Arc<ThreadPool>,
    pub simulator: Arc<dyn Simulator>,
    pub fitness: Arc<dyn FitnessFunction>,
}

impl Worker {
    /// Serves commands until `Quit` or until the coordinator drops its end.
    pub async fn run(self, mut commands: mpsc::Receiver<Message>) -> WorkerReport {
        let rank = self.rank;
        let mut report = WorkerReport {
            rank,
            ..Default::default()
        };
        debug!(rank, threads = self.pool.current_num_threads(), "Worker started");

        loop {
            match commands.recv().await {
                Some(Message::Evaluate { shard, reply }) => {
                    let offset = shard.offset;
                    let strategies = match self.evaluate(shard).await {
                        Ok(strategies) => strategies,
                        Err(error) => {
                            // Dropping `reply` tells the coordinator this shard is lost.
                            warn!(rank, %error, "Shard evaluation failed");
                            continue;
                        }
                    };
                    report.shards_evaluated += 1;
                    report.strategies_evaluated += strategies.len();

                    if reply
                        .send(ShardResult {
                            rank,
                            offset,
                            strategies,
                        })
                        .is_err()
                    {
                        warn!(rank, "Coordinator stopped waiting for shard");
                    }
                }
                Some(Message::Quit) => {
                    report.quit_commands += 1;
                    break;
                }
                None => {
                    warn!(rank, "Command channel closed before a quit command");
                    break;
                }
            }
        }

        debug!(rank, shards = report.shards_evaluated, "Worker exiting");
        report
    }

    /// Runs the shard on this worker's own rayon pool, off the async runtime.
    async fn evaluate(&self, shard: Shard) -> Result<Vec<Strategy>, tokio::task::JoinError> {
        let pool = Arc::clone(&self.pool);
        let simulator = Arc::clone(&self.simulator);
        let fitness = Arc::clone(&self.fitness);
        let Shard {
            mut strategies,
            best,
            context,
            ..
        } = shard;

        tokio::task::spawn_blocking(move || {
            pool.install(|| {
                evaluate_strategies(&mut strategies, &best, &context, &*simulator, &*fitness)
            });
            strategies
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{EnergyFitness, KinematicSimulator, SimulationContext, VehicleModel};
    use crate::strategy::StrategyBounds;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio::sync::oneshot;

    fn worker(rank: usize) -> Worker {
        Worker {
            rank,
            pool: Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(2)
                    .build()
                    .unwrap(),
            ),
            simulator: Arc::new(KinematicSimulator::new(
                VehicleModel::default(),
                &StrategyBounds::default(),
            )),
            fitness: Arc::new(EnergyFitness::default()),
        }
    }

    // Test a worker evaluates a shard, then stops on its single quit.
    #[tokio::test]
    async fn test_worker_evaluates_then_quits() {
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(worker(3).run(rx));

        let mut rng = StdRng::seed_from_u64(8);
        let strategies: Vec<Strategy> = (0..5)
            .map(|_| Strategy::random(&StrategyBounds::default(), &mut rng))
            .collect();
        let (reply, answer) = oneshot::channel();
        tx.send(Message::Evaluate {
            shard: Shard {
                offset: 10,
                strategies,
                best: Arc::new(Strategy::default()),
                context: SimulationContext::default(),
            },
            reply,
        })
        .await
        .unwrap();

        let result = answer.await.unwrap();
        assert_eq!(result.rank, 3);
        assert_eq!(result.offset, 10);
        assert_eq!(result.strategies.len(), 5);
        assert!(result.strategies.iter().all(|s| s.fitness.is_finite()));

        tx.send(Message::Quit).await.unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.quit_commands, 1);
        assert_eq!(report.shards_evaluated, 1);
        assert_eq!(report.strategies_evaluated, 5);
    }

    // Dropping the sender ends the worker without a quit.
    #[tokio::test]
    async fn test_worker_exits_when_channel_closes() {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(worker(0).run(rx));
        drop(tx);
        let report = handle.await.unwrap();
        assert_eq!(report.quit_commands, 0);
    }
}
