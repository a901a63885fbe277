use crate::events::names;
use crate::individual::Individual;
use crate::world::{EvolutionContext, World};
use log::{debug, warn};
use rand_chacha::ChaCha8Rng;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Parent property: how many new individuals list this parent first.
pub const PROP_OFFSPRING: &str = "Offspring";
/// Parent property: how many new individuals list this parent at all.
pub const PROP_PARENT_OF: &str = "ParentOf";

/// Drives the generation loop of one [`World`].
pub struct EvolutionManager {
    pub world: World,
    pub ctx: EvolutionContext,
    /// External triggers (e.g. a failed evaluation listener) set this flag
    /// to repeat the evaluation phase of the current generation.
    pub restart_generation: Arc<AtomicBool>,
}

impl EvolutionManager {
    pub fn new(world: World, ctx: EvolutionContext) -> Self {
        EvolutionManager {
            world,
            ctx,
            restart_generation: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Selects, mutates and evaluates one full generation. Returns `true`
    /// when the generation completed or a shutdown interrupted it cleanly,
    /// `false` on a configuration error.
    pub fn process_next_generation(&mut self, rng: &mut ChaCha8Rng) -> bool {
        if self.world.algorithm.is_none() {
            warn!(
                "EvolutionManager: could not find an evolution algorithm for world [{}]! [SKIPPING]",
                self.world.name
            );
            return false;
        }

        self.ctx.current_generation += 1;
        self.ctx.events.trigger(names::GENERATION_STARTED);
        if self.ctx.checkpoint() {
            return true;
        }

        self.ctx.events.trigger(names::SELECTION_STARTED);
        if self.ctx.checkpoint() {
            return true;
        }

        let parents_per_individual = self
            .world
            .algorithm
            .as_ref()
            .map(|a| a.required_parents_per_individual())
            .unwrap_or(1);

        let mut new_generations = Vec::with_capacity(self.world.populations.len());
        for population in self.world.populations.iter_mut() {
            for individual in population.individuals.iter_mut() {
                individual.protect_genome(false);
            }

            // at least one individual per population, to keep the
            // evolution controllable
            let desired_size = population.desired_population_size.max(1);

            let mut proportion_sum: f64 = population
                .selections
                .iter()
                .map(|entry| entry.proportion)
                .sum();
            if proportion_sum == 0.0 {
                proportion_sum = 0.0001;
            }

            let mut new_generation: Vec<Individual> = Vec::new();
            let mut selections = mem::take(&mut population.selections);
            for entry in selections.iter_mut() {
                if entry.proportion <= 0.0 {
                    continue;
                }
                let share = ((desired_size as f64) * (entry.proportion / proportion_sum)).abs()
                    as usize;
                let seed = entry.method.create_seed(
                    population,
                    share,
                    population.number_of_preserved_parents,
                    parents_per_individual,
                    &mut self.ctx.ids,
                    rng,
                );
                for individual in seed {
                    if !new_generation.iter().any(|n| n.id == individual.id) {
                        new_generation.push(individual);
                    }
                }
            }
            population.selections = selections;

            // fill up to the desired size with parentless individuals
            while new_generation.len() < desired_size {
                new_generation.push(Individual::new(self.ctx.ids.next_id()));
            }

            // lineage bookkeeping on the outgoing generation
            for parent in population.individuals.iter_mut() {
                let first_parent = new_generation
                    .iter()
                    .filter(|n| n.parents.first() == Some(&parent.id))
                    .count();
                let additional_parent = new_generation
                    .iter()
                    .filter(|n| n.parents.contains(&parent.id))
                    .count();
                parent
                    .properties
                    .set(PROP_OFFSPRING, first_parent.to_string());
                parent
                    .properties
                    .set(PROP_PARENT_OF, additional_parent.to_string());
            }

            new_generations.push(new_generation);
            if self.ctx.checkpoint() {
                return true;
            }
        }

        self.ctx.events.trigger(names::SELECTION_COMPLETED);
        if self.ctx.checkpoint() {
            return true;
        }

        // swap in the new generations; the parent genomes stay reachable by
        // id for the mutation chain, the old individuals await destruction
        let parent_genomes = self.world.collect_genomes();
        let mut trashcan: Vec<Individual> = Vec::new();
        for (population, new_generation) in self
            .world
            .populations
            .iter_mut()
            .zip(new_generations.into_iter())
        {
            trashcan.extend(mem::replace(&mut population.individuals, new_generation));
        }

        let mut algorithm = self.world.algorithm.take();
        let ok = match algorithm.as_mut() {
            Some(algorithm) => algorithm.create_next_generation(
                &mut self.world.populations,
                &parent_genomes,
                &mut trashcan,
                &self.ctx,
                rng,
            ),
            None => false,
        };
        self.world.algorithm = algorithm;
        if !ok {
            return false;
        }
        if self.ctx.checkpoint() {
            return true;
        }

        // parents may be destroyed below, drop the references to them
        for population in self.world.populations.iter_mut() {
            for individual in population.individuals.iter_mut() {
                individual.parents.clear();
            }
        }
        debug!(
            "EvolutionManager: destroying {} individuals of generation {}.",
            trashcan.len(),
            self.ctx.current_generation - 1
        );
        trashcan.clear();

        // the evaluation phase may be restarted by external listeners
        loop {
            self.ctx.events.trigger(names::EVALUATION_STARTED);
            if self.ctx.checkpoint() {
                return true;
            }
            self.restart_generation.store(false, Ordering::Relaxed);

            let mut evaluation = self.world.evaluation.take();
            if let Some(evaluation) = evaluation.as_mut() {
                evaluation.evaluate(&mut self.world.populations, &self.ctx);
            }
            self.world.evaluation = evaluation;
            if self.ctx.checkpoint() {
                return true;
            }

            if !self.restart_generation.load(Ordering::Relaxed) {
                break;
            }
        }

        self.ctx.events.trigger(names::EVALUATION_COMPLETED);
        if self.ctx.checkpoint() {
            return true;
        }

        self.ctx.events.trigger(names::GENERATION_COMPLETED);
        self.ctx.checkpoint();
        true
    }

    /// Discards the current individuals and resets the generation counter.
    pub fn restart_evolution(&mut self) -> bool {
        for population in self.world.populations.iter_mut() {
            population.individuals.clear();
        }
        self.ctx.current_generation = 0;
        self.ctx.events.trigger(names::EVOLUTION_RESTARTED);
        self.ctx.checkpoint();
        true
    }
}
