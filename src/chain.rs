use crate::events::names;
use crate::individual::Individual;
use crate::network::{NeuralNetwork, PROP_MUTATION_HISTORY};
use crate::operators::{MutationOperator, OperatorContext, PROP_GENOME_CHANGE_SUMMARY};
use crate::population::Population;
use crate::world::{EvolutionAlgorithm, EvolutionContext};
use log::{debug, warn};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::path::PathBuf;

/// The chain-of-mutation-operators evolution algorithm.
///
/// Every non-protected individual is pushed through the index-sorted
/// operator list in repeated passes until a pass completes without any
/// operator rejecting the genome, or no operator is applicable anymore.
/// Individuals that never stabilize are culled into the trashcan.
pub struct MutationChainAlgorithm {
    operators: Vec<Box<dyn MutationOperator>>,
    pub enable_mutation_history: bool,
    /// When set, the last genome state of discarded individuals is written
    /// here for postmortem inspection.
    pub discarded_genome_dump: Option<PathBuf>,
}

enum ChainOutcome {
    Stable,
    Discarded,
    Interrupted,
}

impl MutationChainAlgorithm {
    pub fn new(operators: Vec<Box<dyn MutationOperator>>, enable_mutation_history: bool) -> Self {
        MutationChainAlgorithm {
            operators,
            enable_mutation_history,
            discarded_genome_dump: None,
        }
    }

    pub fn add_operator(&mut self, operator: Box<dyn MutationOperator>) -> bool {
        if self.operators.iter().any(|o| o.name() == operator.name()) {
            return false;
        }
        self.operators.push(operator);
        true
    }

    pub fn operators(&self) -> &[Box<dyn MutationOperator>] {
        &self.operators
    }

    /// Repeated operator passes over one individual until stable, discarded
    /// or interrupted by shutdown.
    fn run_chain(
        &self,
        individual: &mut Individual,
        op_ctx: &OperatorContext,
        ctx: &EvolutionContext,
        rng: &mut ChaCha8Rng,
    ) -> ChainOutcome {
        let mut modification_valid = false;
        let mut still_applicable = true;
        let mut iteration_counter: usize = 0;

        while !modification_valid && still_applicable {
            modification_valid = true;
            still_applicable = false;

            if ctx.checkpoint() {
                return ChainOutcome::Interrupted;
            }

            for operator in &self.operators {
                if operator.is_enabled()
                    && operator.maximal_number_of_applications() > iteration_counter
                {
                    still_applicable = true;

                    if individual.is_genome_protected() {
                        break;
                    }

                    if !operator.apply(individual, op_ctx, rng) {
                        // rejections are cooperative signals, not early exits
                        modification_valid = false;
                        debug!(
                            "Mutation chain: operator [{}] rejected individual [{}] in pass {}.",
                            operator.name(),
                            individual.id,
                            iteration_counter
                        );
                    }
                }
                if ctx.checkpoint() {
                    return ChainOutcome::Interrupted;
                }
            }
            iteration_counter += 1;
        }

        if !modification_valid || !still_applicable {
            ChainOutcome::Discarded
        } else {
            ChainOutcome::Stable
        }
    }

    /// Appends this generation's change summary to the genome's mutation
    /// history, tagged with the generation number.
    fn record_mutation_history(individual: &mut Individual, generation: usize) {
        let mutations = individual
            .properties
            .get(PROP_GENOME_CHANGE_SUMMARY)
            .unwrap_or("")
            .trim()
            .to_string();
        if mutations.is_empty() {
            return;
        }
        if let Some(genome) = individual.genome.as_mut() {
            let current = genome
                .properties
                .get(PROP_MUTATION_HISTORY)
                .unwrap_or("")
                .trim()
                .to_string();
            genome.properties.set(
                PROP_MUTATION_HISTORY,
                format!("{current}|{generation}:{mutations}"),
            );
        }
    }

    fn dump_discarded_genome(&self, individual: &Individual) {
        if let (Some(path), Some(genome)) = (&self.discarded_genome_dump, &individual.genome) {
            if let Err(e) = std::fs::write(path, genome.to_onn_xml()) {
                warn!("Mutation chain: could not dump discarded genome: {e}");
            }
        }
    }
}

impl EvolutionAlgorithm for MutationChainAlgorithm {
    fn name(&self) -> &str {
        "MutationChain"
    }

    fn create_next_generation(
        &mut self,
        populations: &mut [Population],
        parent_genomes: &HashMap<u32, NeuralNetwork>,
        trashcan: &mut Vec<Individual>,
        ctx: &EvolutionContext,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        // ascending index order; ties keep insertion order
        self.operators.sort_by_key(|o| o.operator_index());

        let op_ctx = OperatorContext {
            generation: ctx.current_generation,
            parent_genomes,
        };

        for population in populations.iter_mut() {
            if ctx.is_shutting_down() {
                break;
            }

            let individuals = std::mem::take(&mut population.individuals);
            let total = individuals.len();
            let mut kept: Vec<Individual> = Vec::with_capacity(total);
            let mut pending = individuals.into_iter();

            for (counter, mut individual) in pending.by_ref().enumerate() {
                if ctx.checkpoint() {
                    // unprocessed individuals stay in the population untouched
                    kept.push(individual);
                    break;
                }

                ctx.events.trigger(names::GENERATE_INDIVIDUAL_STARTED);
                individual.properties.set("Index", (counter + 1).to_string());

                debug!(
                    "Mutation chain: pop [{}] individual {}/{} (id {}).",
                    population.name,
                    counter + 1,
                    total,
                    individual.id
                );

                if individual.is_genome_protected() {
                    kept.push(individual);
                    ctx.events.trigger(names::GENERATE_INDIVIDUAL_COMPLETED);
                    continue;
                }

                match self.run_chain(&mut individual, &op_ctx, ctx, rng) {
                    ChainOutcome::Interrupted => {
                        kept.push(individual);
                        ctx.events.trigger(names::GENERATE_INDIVIDUAL_COMPLETED);
                        break;
                    }
                    ChainOutcome::Discarded => {
                        warn!(
                            "Mutation chain: could not find a suitable mutation for individual [{}].",
                            individual.id
                        );
                        self.dump_discarded_genome(&individual);
                        trashcan.push(individual);
                        ctx.events.trigger(names::GENERATE_INDIVIDUAL_COMPLETED);
                    }
                    ChainOutcome::Stable => {
                        if self.enable_mutation_history {
                            Self::record_mutation_history(
                                &mut individual,
                                ctx.current_generation,
                            );
                        }
                        if let Some(genome) = individual.genome.as_mut() {
                            genome.remove_markers();
                        }
                        kept.push(individual);
                        ctx.events.trigger(names::GENERATE_INDIVIDUAL_COMPLETED);
                    }
                }
            }

            // anything left after an interruption is carried over unprocessed
            kept.extend(pending);
            population.individuals = kept;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PROP_ELEMENT_NEW;
    use crate::operators::standard_operators;
    use crate::param::Mutation;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct AlwaysRejectOperator;

    impl MutationOperator for AlwaysRejectOperator {
        fn name(&self) -> &str {
            "AlwaysReject"
        }
        fn operator_index(&self) -> i32 {
            50
        }
        fn maximal_number_of_applications(&self) -> usize {
            3
        }
        fn is_enabled(&self) -> bool {
            true
        }
        fn apply(&self, _: &mut Individual, _: &OperatorContext, _: &mut ChaCha8Rng) -> bool {
            false
        }
    }

    fn run_on(
        algorithm: &mut MutationChainAlgorithm,
        population: &mut Population,
    ) -> Vec<Individual> {
        let ctx = EvolutionContext::new(Arc::new(AtomicBool::new(false)));
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let parent_genomes = HashMap::new();
        let mut trashcan = Vec::new();
        algorithm.create_next_generation(
            std::slice::from_mut(population),
            &parent_genomes,
            &mut trashcan,
            &ctx,
            &mut rng,
        );
        trashcan
    }

    #[test]
    fn test_protected_individual_is_untouched() {
        let mut mutation = Mutation::default();
        mutation.change_bias_probability = 1.0;
        let mut algorithm = MutationChainAlgorithm::new(standard_operators(&mutation), false);

        let mut pop = Population::new("Main", 1, 0);
        let mut ind = Individual::new(1);
        ind.set_genome(NeuralNetwork::initial(1, 1));
        ind.protect_genome(true);
        let genome_before = ind.genome.clone();
        pop.individuals.push(ind);

        let trashcan = run_on(&mut algorithm, &mut pop);
        assert!(trashcan.is_empty());
        assert_eq!(pop.individuals.len(), 1);
        assert_eq!(pop.individuals[0].genome, genome_before);
    }

    #[test]
    fn test_valid_first_pass_accepts_after_one_pass() {
        let mutation = Mutation::default();
        let mut algorithm = MutationChainAlgorithm::new(standard_operators(&mutation), false);

        let mut pop = Population::new("Main", 1, 0);
        let mut ind = Individual::new(1);
        ind.parents.push(99);
        pop.individuals.push(ind);

        let ctx = EvolutionContext::new(Arc::new(AtomicBool::new(false)));
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let mut parent_genomes = HashMap::new();
        parent_genomes.insert(99_u32, NeuralNetwork::initial(2, 1));
        let mut trashcan = Vec::new();
        algorithm.create_next_generation(
            std::slice::from_mut(&mut pop),
            &parent_genomes,
            &mut trashcan,
            &ctx,
            &mut rng,
        );

        assert!(trashcan.is_empty());
        assert!(pop.individuals[0].genome.is_some());
        assert_eq!(
            ctx.events.trigger_count(names::GENERATE_INDIVIDUAL_COMPLETED),
            1
        );
    }

    #[test]
    fn test_exhausted_rejections_cull_into_trashcan() {
        let mut algorithm =
            MutationChainAlgorithm::new(vec![Box::new(AlwaysRejectOperator)], false);

        let mut pop = Population::new("Main", 1, 0);
        pop.individuals.push(Individual::new(1));

        let trashcan = run_on(&mut algorithm, &mut pop);
        assert_eq!(pop.individuals.len(), 0);
        assert_eq!(trashcan.len(), 1);
        assert_eq!(trashcan[0].id, 1);
    }

    #[test]
    fn test_no_applicable_operator_culls_immediately() {
        let mut algorithm = MutationChainAlgorithm::new(Vec::new(), false);

        let mut pop = Population::new("Main", 1, 0);
        pop.individuals.push(Individual::new(1));

        let trashcan = run_on(&mut algorithm, &mut pop);
        assert_eq!(pop.individuals.len(), 0);
        assert_eq!(trashcan.len(), 1);
    }

    #[test]
    fn test_markers_are_stripped_on_stable_genomes() {
        let mut mutation = Mutation::default();
        mutation.insert_neuron_probability = 1.0;
        mutation.insert_synapse_probability = 1.0;
        let mut algorithm = MutationChainAlgorithm::new(standard_operators(&mutation), false);

        let mut pop = Population::new("Main", 1, 0);
        let mut ind = Individual::new(1);
        ind.set_genome(NeuralNetwork::initial(2, 1));
        pop.individuals.push(ind);

        run_on(&mut algorithm, &mut pop);
        let genome = pop.individuals[0].genome.as_ref().unwrap();
        for neuron in &genome.neurons {
            assert!(!neuron.properties.has(PROP_ELEMENT_NEW));
        }
        for synapse in &genome.synapses {
            assert!(!synapse.properties.has(PROP_ELEMENT_NEW));
        }
    }

    #[test]
    fn test_mutation_history_is_tagged_with_generation() {
        let mut mutation = Mutation::default();
        mutation.change_bias_probability = 1.0;
        mutation.enable_mutation_history = true;
        let mut algorithm = MutationChainAlgorithm::new(standard_operators(&mutation), true);

        let mut pop = Population::new("Main", 1, 0);
        let mut ind = Individual::new(1);
        let mut genome = NeuralNetwork::initial(1, 1);
        genome.add_neuron(0.2);
        ind.set_genome(genome);
        pop.individuals.push(ind);

        let mut ctx = EvolutionContext::new(Arc::new(AtomicBool::new(false)));
        ctx.current_generation = 4;
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let parent_genomes = HashMap::new();
        let mut trashcan = Vec::new();
        algorithm.create_next_generation(
            std::slice::from_mut(&mut pop),
            &parent_genomes,
            &mut trashcan,
            &ctx,
            &mut rng,
        );

        let genome = pop.individuals[0].genome.as_ref().unwrap();
        let history = genome.properties.get(PROP_MUTATION_HISTORY).unwrap();
        assert!(history.contains("|4:"));
    }

    #[test]
    fn test_shutdown_leaves_remaining_individuals_unprocessed() {
        let mutation = Mutation::default();
        let mut algorithm = MutationChainAlgorithm::new(standard_operators(&mutation), false);

        let mut pop = Population::new("Main", 3, 0);
        for id in 1..=3 {
            pop.individuals.push(Individual::new(id));
        }

        let flag = Arc::new(AtomicBool::new(false));
        let ctx = EvolutionContext::new(flag.clone());
        flag.store(true, Ordering::Relaxed);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let parent_genomes = HashMap::new();
        let mut trashcan = Vec::new();
        algorithm.create_next_generation(
            std::slice::from_mut(&mut pop),
            &parent_genomes,
            &mut trashcan,
            &ctx,
            &mut rng,
        );

        // shutdown observed before any individual was touched
        assert!(trashcan.is_empty());
        assert_eq!(pop.individuals.len(), 3);
        assert!(pop.individuals.iter().all(|i| i.genome.is_none()));
    }
}
