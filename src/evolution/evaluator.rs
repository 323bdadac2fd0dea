use crate::evolution::generation::Generation;
use crate::evolution::EvolutionError;
use crate::simulation::{FitnessFunction, SimulationContext, Simulator};
use crate::strategy::Strategy;
use futures::{future::BoxFuture, FutureExt};
use std::sync::Arc;

/// Fills in simulation, similarity and fitness for every occupied slot of a
/// generation. Either inline ([`LocalEvaluator`]) or spread over a process
/// group.
pub trait PopulationEvaluator: Send + Sync {
    fn evaluate<'a>(
        &'a self,
        generation: &'a mut Generation,
        best: &'a Strategy,
        context: &'a SimulationContext,
    ) -> BoxFuture<'a, Result<(), EvolutionError>>;
}

/// Evaluates on the caller's rayon pool.
#[derive(Clone)]
pub struct LocalEvaluator {
    simulator: Arc<dyn Simulator>,
    fitness: Arc<dyn FitnessFunction>,
}

impl LocalEvaluator {
    pub fn new(simulator: Arc<dyn Simulator>, fitness: Arc<dyn FitnessFunction>) -> Self {
        LocalEvaluator { simulator, fitness }
    }
}

impl PopulationEvaluator for LocalEvaluator {
    fn evaluate<'a>(
        &'a self,
        generation: &'a mut Generation,
        best: &'a Strategy,
        context: &'a SimulationContext,
    ) -> BoxFuture<'a, Result<(), EvolutionError>> {
        async move {
            generation.evaluate_fitness(best, context, &*self.simulator, &*self.fitness);
            Ok(())
        }
        .boxed()
    }
}
