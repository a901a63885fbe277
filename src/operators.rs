use crate::individual::Individual;
use crate::network::{NeuralNetwork, PROP_ELEMENT_MODIFIED, PROP_ELEMENT_NEW};
use crate::param::Mutation;
use log::warn;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

/// Individual property collecting the short codes of this generation's
/// genome changes, e.g. "N:5 S:2>5 B:3".
pub const PROP_GENOME_CHANGE_SUMMARY: &str = "GenomeChangeSummary";
/// Element property recording the generation an element was created in.
pub const PROP_CREATION_DATE: &str = "CreationDate";

/// Shared state the chain hands to every operator application.
pub struct OperatorContext<'a> {
    pub generation: usize,
    /// Genomes of the previous generation, keyed by individual id.
    pub parent_genomes: &'a HashMap<u32, NeuralNetwork>,
}

/// One step of the mutation chain.
///
/// Operators run in ascending `operator_index` order, at most
/// `maximal_number_of_applications` times per individual. Returning `false`
/// rejects the current genome state; the chain then runs another pass over
/// all applicable operators.
pub trait MutationOperator {
    fn name(&self) -> &str;
    fn operator_index(&self) -> i32;
    fn maximal_number_of_applications(&self) -> usize;
    fn is_enabled(&self) -> bool;

    fn apply(
        &self,
        individual: &mut Individual,
        ctx: &OperatorContext,
        rng: &mut ChaCha8Rng,
    ) -> bool;
}

fn append_change_summary(individual: &mut Individual, entry: &str) {
    let summary = match individual.properties.get(PROP_GENOME_CHANGE_SUMMARY) {
        Some(current) if !current.is_empty() => format!("{current} {entry}"),
        _ => entry.to_string(),
    };
    individual.properties.set(PROP_GENOME_CHANGE_SUMMARY, summary);
}

/// Gives parentless and freshly selected individuals a genome: a copy of the
/// first parent's genome when one exists, an initial input/output scaffold
/// otherwise. Runs once per individual and first in the chain.
pub struct CreateGenomeOperator {
    pub enabled: bool,
    pub initial_inputs: usize,
    pub initial_outputs: usize,
}

impl CreateGenomeOperator {
    pub fn new(mutation: &Mutation) -> Self {
        CreateGenomeOperator {
            enabled: true,
            initial_inputs: mutation.initial_inputs,
            initial_outputs: mutation.initial_outputs,
        }
    }
}

impl MutationOperator for CreateGenomeOperator {
    fn name(&self) -> &str {
        "CreateGenome"
    }

    fn operator_index(&self) -> i32 {
        0
    }

    fn maximal_number_of_applications(&self) -> usize {
        1
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn apply(
        &self,
        individual: &mut Individual,
        ctx: &OperatorContext,
        _rng: &mut ChaCha8Rng,
    ) -> bool {
        if individual.genome.is_some() {
            return true;
        }
        let genome = individual
            .parents
            .first()
            .and_then(|parent_id| ctx.parent_genomes.get(parent_id))
            .cloned();
        match genome {
            Some(genome) => individual.set_genome(genome),
            None => {
                let mut genome = NeuralNetwork::initial(self.initial_inputs, self.initial_outputs);
                genome
                    .properties
                    .set(PROP_CREATION_DATE, ctx.generation.to_string());
                individual.set_genome(genome);
            }
        }
        true
    }
}

/// Inserts a hidden neuron with a given probability, up to a hidden-neuron
/// cap. New neurons are tagged so the synapse operator can wire them up.
pub struct InsertNeuronOperator {
    pub enabled: bool,
    pub insertion_probability: f64,
    pub max_hidden_neurons: usize,
    pub max_applications: usize,
}

impl InsertNeuronOperator {
    pub fn new(mutation: &Mutation) -> Self {
        InsertNeuronOperator {
            enabled: mutation.insert_neuron_probability > 0.0,
            insertion_probability: mutation.insert_neuron_probability,
            max_hidden_neurons: mutation.max_hidden_neurons,
            max_applications: mutation.max_applications,
        }
    }
}

impl MutationOperator for InsertNeuronOperator {
    fn name(&self) -> &str {
        "InsertNeuron"
    }

    fn operator_index(&self) -> i32 {
        100
    }

    fn maximal_number_of_applications(&self) -> usize {
        self.max_applications
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn apply(
        &self,
        individual: &mut Individual,
        ctx: &OperatorContext,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let generation = ctx.generation;
        let Some(genome) = individual.genome.as_mut() else {
            warn!("InsertNeuron: individual [{}] has no genome.", individual.id);
            return false;
        };
        if genome.hidden_neurons().count() >= self.max_hidden_neurons {
            return true;
        }
        if rng.gen::<f64>() >= self.insertion_probability {
            return true;
        }
        let id = genome.add_neuron(0.0);
        if let Some(neuron) = genome.neuron_mut(id) {
            neuron.properties.set(PROP_ELEMENT_NEW, "");
            neuron
                .properties
                .set(PROP_CREATION_DATE, generation.to_string());
        }
        append_change_summary(individual, &format!("N:{id}"));
        true
    }
}

/// Inserts synapses between random neuron pairs, and makes sure neurons
/// created earlier in the pass get at least one connection. A new neuron
/// that cannot be wired up rejects the genome state.
pub struct InsertSynapseOperator {
    pub enabled: bool,
    pub insertion_probability: f64,
    pub max_synapses: usize,
    pub max_applications: usize,
}

impl InsertSynapseOperator {
    pub fn new(mutation: &Mutation) -> Self {
        InsertSynapseOperator {
            enabled: mutation.insert_synapse_probability > 0.0,
            insertion_probability: mutation.insert_synapse_probability,
            max_synapses: mutation.max_synapses,
            max_applications: mutation.max_applications,
        }
    }

    /// A random synapse whose target is no input neuron and whose
    /// source-target pair is still unused. Bounded number of draws.
    fn insert_random_synapse(
        genome: &mut NeuralNetwork,
        forced_endpoint: Option<u64>,
        rng: &mut ChaCha8Rng,
    ) -> Option<u64> {
        let neuron_ids: Vec<u64> = genome.neurons.iter().map(|n| n.id).collect();
        let target_ids: Vec<u64> = genome
            .neurons
            .iter()
            .filter(|n| !n.is_input())
            .map(|n| n.id)
            .collect();
        if neuron_ids.is_empty() || target_ids.is_empty() {
            return None;
        }
        for _ in 0..10 {
            let mut source = neuron_ids[rng.gen_range(0..neuron_ids.len())];
            let mut target = target_ids[rng.gen_range(0..target_ids.len())];
            if let Some(endpoint) = forced_endpoint {
                if rng.gen_bool(0.5) && target_ids.contains(&endpoint) {
                    target = endpoint;
                } else {
                    source = endpoint;
                }
            }
            let strength = rng.gen_range(-1.0..1.0);
            if let Some(id) = genome.add_synapse(source, target, strength) {
                if let Some(synapse) = genome.synapse_mut(id) {
                    synapse.properties.set(PROP_ELEMENT_NEW, "");
                }
                return Some(id);
            }
        }
        None
    }
}

impl MutationOperator for InsertSynapseOperator {
    fn name(&self) -> &str {
        "InsertSynapse"
    }

    fn operator_index(&self) -> i32 {
        200
    }

    fn maximal_number_of_applications(&self) -> usize {
        self.max_applications
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn apply(
        &self,
        individual: &mut Individual,
        _ctx: &OperatorContext,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let individual_id = individual.id;
        let Some(genome) = individual.genome.as_mut() else {
            warn!("InsertSynapse: individual [{individual_id}] has no genome.");
            return false;
        };

        // new neurons must not stay disconnected
        let unconnected: Vec<u64> = genome
            .neurons
            .iter()
            .filter(|n| n.properties.has(PROP_ELEMENT_NEW))
            .filter(|n| {
                !genome
                    .synapses
                    .iter()
                    .any(|s| s.source == n.id || s.target == n.id)
            })
            .map(|n| n.id)
            .collect();

        let mut inserted = Vec::new();
        for neuron_id in unconnected {
            match Self::insert_random_synapse(genome, Some(neuron_id), rng) {
                Some(id) => inserted.push(id),
                None => return false,
            }
        }

        if genome.synapses.len() < self.max_synapses && rng.gen::<f64>() < self.insertion_probability
        {
            if let Some(id) = Self::insert_random_synapse(genome, None, rng) {
                inserted.push(id);
            }
        }

        for id in inserted {
            append_change_summary(individual, &format!("S:{id}"));
        }
        true
    }
}

/// Perturbs neuron bias values with gaussian noise.
pub struct ChangeBiasOperator {
    pub enabled: bool,
    pub change_probability: f64,
    pub deviation: f64,
    pub min_bias: f64,
    pub max_bias: f64,
    pub max_applications: usize,
}

impl ChangeBiasOperator {
    pub fn new(mutation: &Mutation) -> Self {
        ChangeBiasOperator {
            enabled: mutation.change_bias_probability > 0.0,
            change_probability: mutation.change_bias_probability,
            deviation: mutation.change_bias_deviation,
            min_bias: -10.0,
            max_bias: 10.0,
            max_applications: mutation.max_applications,
        }
    }
}

impl MutationOperator for ChangeBiasOperator {
    fn name(&self) -> &str {
        "ChangeBias"
    }

    fn operator_index(&self) -> i32 {
        300
    }

    fn maximal_number_of_applications(&self) -> usize {
        self.max_applications
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn apply(
        &self,
        individual: &mut Individual,
        _ctx: &OperatorContext,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let individual_id = individual.id;
        let Some(genome) = individual.genome.as_mut() else {
            warn!("ChangeBias: individual [{individual_id}] has no genome.");
            return false;
        };
        // a degenerate deviation cannot change anything
        if !(self.deviation > 0.0) {
            return true;
        }
        let Ok(normal) = Normal::new(0.0, self.deviation) else {
            return true;
        };

        let mut changed = Vec::new();
        for neuron in genome.neurons.iter_mut().filter(|n| !n.is_input()) {
            if rng.gen::<f64>() >= self.change_probability {
                continue;
            }
            let offset: f64 = normal.sample(rng);
            neuron.bias = (neuron.bias + offset).clamp(self.min_bias, self.max_bias);
            neuron.properties.set(PROP_ELEMENT_MODIFIED, "");
            changed.push(neuron.id);
        }
        for id in changed {
            append_change_summary(individual, &format!("B:{id}"));
        }
        true
    }
}

/// Perturbs synapse strengths with gaussian noise.
pub struct ChangeSynapseStrengthOperator {
    pub enabled: bool,
    pub change_probability: f64,
    pub deviation: f64,
    pub min_strength: f64,
    pub max_strength: f64,
    pub max_applications: usize,
}

impl ChangeSynapseStrengthOperator {
    pub fn new(mutation: &Mutation) -> Self {
        ChangeSynapseStrengthOperator {
            enabled: mutation.change_strength_probability > 0.0,
            change_probability: mutation.change_strength_probability,
            deviation: mutation.change_strength_deviation,
            min_strength: -10.0,
            max_strength: 10.0,
            max_applications: mutation.max_applications,
        }
    }
}

impl MutationOperator for ChangeSynapseStrengthOperator {
    fn name(&self) -> &str {
        "ChangeSynapseStrength"
    }

    fn operator_index(&self) -> i32 {
        400
    }

    fn maximal_number_of_applications(&self) -> usize {
        self.max_applications
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn apply(
        &self,
        individual: &mut Individual,
        _ctx: &OperatorContext,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let individual_id = individual.id;
        let Some(genome) = individual.genome.as_mut() else {
            warn!("ChangeSynapseStrength: individual [{individual_id}] has no genome.");
            return false;
        };
        if !(self.deviation > 0.0) {
            return true;
        }
        let Ok(normal) = Normal::new(0.0, self.deviation) else {
            return true;
        };

        let mut changed = Vec::new();
        for synapse in genome.synapses.iter_mut() {
            if rng.gen::<f64>() >= self.change_probability {
                continue;
            }
            let offset: f64 = normal.sample(rng);
            synapse.strength =
                (synapse.strength + offset).clamp(self.min_strength, self.max_strength);
            synapse.properties.set(PROP_ELEMENT_MODIFIED, "");
            changed.push(synapse.id);
        }
        for id in changed {
            append_change_summary(individual, &format!("W:{id}"));
        }
        true
    }
}

/// Removes a random hidden neuron, cascading its synapses. Interface
/// neurons are never removed.
pub struct RemoveNeuronOperator {
    pub enabled: bool,
    pub removal_probability: f64,
    pub max_applications: usize,
}

impl RemoveNeuronOperator {
    pub fn new(mutation: &Mutation) -> Self {
        RemoveNeuronOperator {
            enabled: mutation.remove_neuron_probability > 0.0,
            removal_probability: mutation.remove_neuron_probability,
            max_applications: mutation.max_applications,
        }
    }
}

impl MutationOperator for RemoveNeuronOperator {
    fn name(&self) -> &str {
        "RemoveNeuron"
    }

    fn operator_index(&self) -> i32 {
        500
    }

    fn maximal_number_of_applications(&self) -> usize {
        self.max_applications
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn apply(
        &self,
        individual: &mut Individual,
        _ctx: &OperatorContext,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let individual_id = individual.id;
        let Some(genome) = individual.genome.as_mut() else {
            warn!("RemoveNeuron: individual [{individual_id}] has no genome.");
            return false;
        };
        if rng.gen::<f64>() >= self.removal_probability {
            return true;
        }
        let hidden: Vec<u64> = genome.hidden_neurons().map(|n| n.id).collect();
        if hidden.is_empty() {
            return true;
        }
        let id = hidden[rng.gen_range(0..hidden.len())];
        genome.remove_neuron(id);
        append_change_summary(individual, &format!("R:{id}"));
        true
    }
}

/// The default operator set, in chain order, configured from the mutation
/// section.
pub fn standard_operators(mutation: &Mutation) -> Vec<Box<dyn MutationOperator>> {
    vec![
        Box::new(CreateGenomeOperator::new(mutation)),
        Box::new(InsertNeuronOperator::new(mutation)),
        Box::new(InsertSynapseOperator::new(mutation)),
        Box::new(ChangeBiasOperator::new(mutation)),
        Box::new(ChangeSynapseStrengthOperator::new(mutation)),
        Box::new(RemoveNeuronOperator::new(mutation)),
    ]
}
