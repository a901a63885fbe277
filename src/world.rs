use crate::events::{EventBus, TaskQueue};
use crate::evaluation::EvaluationMethod;
use crate::fitness::FitnessRegistry;
use crate::individual::{IdGenerator, Individual};
use crate::network::NeuralNetwork;
use crate::population::Population;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-run shared state: id assignment, the generation counter, the fitness
/// prototype registry, lifecycle events, the cooperative task queue and the
/// shutdown flag. Constructed once and passed explicitly.
pub struct EvolutionContext {
    pub ids: IdGenerator,
    pub current_generation: usize,
    pub fitness_registry: FitnessRegistry,
    pub events: EventBus,
    pub tasks: TaskQueue,
    shutdown: Arc<AtomicBool>,
}

impl EvolutionContext {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        EvolutionContext {
            ids: IdGenerator::new(),
            current_generation: 0,
            fitness_registry: FitnessRegistry::new(),
            events: EventBus::new(),
            tasks: TaskQueue::new(),
            shutdown,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Cooperative checkpoint: runs queued tasks, then reports whether the
    /// loop should abandon its remaining work.
    pub fn checkpoint(&self) -> bool {
        self.tasks.drain();
        self.is_shutting_down()
    }
}

/// Produces the next generation in-place in each population.
pub trait EvolutionAlgorithm {
    fn name(&self) -> &str;

    /// How many parent links the selection methods assign to each new
    /// individual for this algorithm.
    fn required_parents_per_individual(&self) -> usize {
        1
    }

    fn create_next_generation(
        &mut self,
        populations: &mut [Population],
        parent_genomes: &HashMap<u32, NeuralNetwork>,
        trashcan: &mut Vec<Individual>,
        ctx: &EvolutionContext,
        rng: &mut ChaCha8Rng,
    ) -> bool;
}

/// A named evolution world: its populations, at most one evolution
/// algorithm and at most one evaluation method.
pub struct World {
    pub name: String,
    pub populations: Vec<Population>,
    pub algorithm: Option<Box<dyn EvolutionAlgorithm>>,
    pub evaluation: Option<Box<dyn EvaluationMethod>>,
}

impl World {
    pub fn new(name: &str) -> Self {
        World {
            name: name.to_string(),
            populations: Vec::new(),
            algorithm: None,
            evaluation: None,
        }
    }

    pub fn population(&self, name: &str) -> Option<&Population> {
        self.populations.iter().find(|p| p.name == name)
    }

    /// Genomes of the current generation across all populations, keyed by
    /// individual id. The mutation chain uses this to copy parent genomes
    /// after the old generation has been detached.
    pub fn collect_genomes(&self) -> HashMap<u32, NeuralNetwork> {
        let mut genomes = HashMap::new();
        for population in &self.populations {
            for individual in &population.individuals {
                if let Some(genome) = &individual.genome {
                    genomes.insert(individual.id, genome.clone());
                }
            }
        }
        genomes
    }
}
