pub mod chain;
pub mod evaluation;
pub mod events;
pub mod fitness;
pub mod groups;
pub mod individual;
pub mod manager;
pub mod network;
pub mod operators;
pub mod param;
pub mod population;
pub mod selection;
pub mod world;

use crate::chain::MutationChainAlgorithm;
use crate::evaluation::{ClusterEvaluationMethod, LocalEvaluationMethod, QsubSubmitter};
use crate::fitness::FitnessFunction;
use crate::manager::EvolutionManager;
use crate::network::NeuralNetwork;
use crate::operators::standard_operators;
use crate::param::{EvaluationKind, Param, PopulationParam, SelectionKind};
use crate::population::{IdentityMapper, Population};
use crate::selection::{
    MultiObjectiveTournamentSelection, PoissonRankingSelection, TournamentSelection,
};
use crate::world::{EvolutionContext, World};
use chrono::Local;
use log::{info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Best fitness per fitness function name after one generation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GenerationRecord {
    pub generation: usize,
    pub best_fitness: HashMap<String, f64>,
}

/// Serializable outcome of one evolutionary run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub timestamp: String,
    pub nevo_version: String,
    pub parameters: Param,
    pub generations: Vec<GenerationRecord>,
    pub execution_time: f64,
}

impl RunRecord {
    pub fn save_json<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn version_string() -> String {
    let git_hash = option_env!("NEVO_GIT_SHA").unwrap_or("unknown");
    format!("{}#{}", env!("CARGO_PKG_VERSION"), git_hash)
}

fn build_population(param: &PopulationParam, ctx: &mut EvolutionContext) -> Population {
    let mut population = Population::new(&param.name, param.desired_size, param.preserved_parents);
    population.mapper = Some(Box::new(IdentityMapper));

    for fitness in &param.fitness_functions {
        ctx.fitness_registry
            .register_prototype(FitnessFunction::new(&fitness.prototype, &fitness.prototype));
        let mut function = FitnessFunction::new(&fitness.name, &fitness.prototype);
        function.aggregation = fitness.aggregation.clone();
        population.add_fitness_function(function);
    }

    for selection in &param.selection {
        let method: Box<dyn crate::selection::SelectionMethod> = match selection.method {
            SelectionKind::Tournament => Box::new(TournamentSelection::new(
                selection.tournament_size,
                &selection.responsible_fitness,
            )),
            SelectionKind::MultiObjectiveTournament => {
                Box::new(MultiObjectiveTournamentSelection::new(
                    selection.tournament_size,
                    &selection.responsible_fitness,
                    &selection.fitness_weights,
                ))
            }
            SelectionKind::PoissonRanking => Box::new(PoissonRankingSelection::new(
                selection.pressure,
                &selection.responsible_fitness,
            )),
        };
        population.add_selection_method(method, selection.proportion);
    }
    population
}

fn build_world(param: &Param, ctx: &mut EvolutionContext) -> World {
    let mut world = World::new(&param.general.world_name);
    for population_param in &param.populations {
        world.populations.push(build_population(population_param, ctx));
    }

    let mut algorithm =
        MutationChainAlgorithm::new(standard_operators(&param.mutation), param.mutation.enable_mutation_history);
    if param.mutation.dump_discarded_genomes {
        algorithm.discarded_genome_dump =
            Some(PathBuf::from(&param.evaluation.working_dir).join("trashcan"));
    }
    world.algorithm = Some(Box::new(algorithm));

    match param.evaluation.method {
        EvaluationKind::Cluster => {
            world.evaluation = Some(Box::new(ClusterEvaluationMethod::new(
                &param.evaluation,
                Box::new(QsubSubmitter),
            )));
        }
        EvaluationKind::Local => {
            warn!(
                "No in-process evaluator is configured for the local evaluation method. \
                 Use run_with_evaluator to supply one. Individuals will keep fitness 0.0."
            );
        }
    }
    world
}

fn record_generation(manager: &EvolutionManager) -> GenerationRecord {
    let mut best_fitness = HashMap::new();
    for population in &manager.world.populations {
        for fitness in population.fitness_functions() {
            let best = population
                .individuals
                .iter()
                .map(|i| i.fitness(fitness.name()))
                .fold(f64::NEG_INFINITY, f64::max);
            if best.is_finite() {
                best_fitness.insert(fitness.name().to_string(), best);
            }
        }
    }
    GenerationRecord {
        generation: manager.ctx.current_generation,
        best_fitness,
    }
}

fn run_manager(mut manager: EvolutionManager, param: &Param) -> RunRecord {
    let start = std::time::Instant::now();
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let mut rng = ChaCha8Rng::seed_from_u64(param.general.seed);

    let mut generations = Vec::new();
    for _ in 0..param.general.max_generations {
        if manager.ctx.is_shutting_down() {
            info!("Shutdown requested. Stopping evolution.");
            break;
        }
        if !manager.process_next_generation(&mut rng) {
            warn!("Generation processing failed. Stopping evolution.");
            break;
        }
        if manager.ctx.is_shutting_down() {
            break;
        }
        generations.push(record_generation(&manager));
    }

    RunRecord {
        id: format!("{}_{}", param.general.world_name, timestamp),
        timestamp,
        nevo_version: version_string(),
        parameters: param.clone(),
        generations,
        execution_time: start.elapsed().as_secs_f64(),
    }
}

/// Runs a full configured evolution. The `shutdown` flag stops the loop
/// cooperatively at the next checkpoint.
pub fn run(param: &Param, shutdown: Arc<AtomicBool>) -> RunRecord {
    let mut ctx = EvolutionContext::new(shutdown);
    let world = build_world(param, &mut ctx);
    run_manager(EvolutionManager::new(world, ctx), param)
}

/// Like [`run`], but evaluates in-process through the supplied evaluator
/// instead of the configured evaluation method.
pub fn run_with_evaluator(
    param: &Param,
    shutdown: Arc<AtomicBool>,
    evaluator: Box<dyn FnMut(&NeuralNetwork) -> Vec<(String, f64)>>,
) -> RunRecord {
    let mut ctx = EvolutionContext::new(shutdown);
    let mut world = build_world(param, &mut ctx);
    world.evaluation = Some(Box::new(LocalEvaluationMethod::new(evaluator)));
    run_manager(EvolutionManager::new(world, ctx), param)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_param() -> Param {
        let mut param = Param::default();
        param.general.max_generations = 3;
        param.general.seed = 11;
        param.evaluation.method = EvaluationKind::Local;
        param.populations[0].desired_size = 8;
        param.populations[0].preserved_parents = 1;
        param
    }

    #[test]
    fn test_run_with_evaluator_completes_all_generations() {
        let param = small_param();
        let record = run_with_evaluator(
            &param,
            Arc::new(AtomicBool::new(false)),
            Box::new(|net: &NeuralNetwork| vec![("Script".to_string(), net.synapses.len() as f64)]),
        );
        assert_eq!(record.generations.len(), 3);
        assert_eq!(record.generations.last().unwrap().generation, 3);
        assert!(record.generations[2].best_fitness.contains_key("Script"));
    }

    #[test]
    fn test_shutdown_flag_stops_the_run_immediately() {
        let param = small_param();
        let record = run_with_evaluator(
            &param,
            Arc::new(AtomicBool::new(true)),
            Box::new(|_| Vec::new()),
        );
        assert!(record.generations.is_empty());
    }

    #[test]
    fn test_build_world_wires_populations_and_algorithm() {
        let param = Param::default();
        let mut ctx = EvolutionContext::new(Arc::new(AtomicBool::new(false)));
        let world = build_world(&param, &mut ctx);
        assert_eq!(world.populations.len(), param.populations.len());
        assert!(world.algorithm.is_some());
        assert!(!world.populations[0].fitness_functions().is_empty());
        assert!(!world.populations[0].selections.is_empty());
    }
}
