use log::warn;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashMap;

/// How the per-try fitness values of one individual collapse into the
/// individual's fitness.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum FitnessAggregation {
    Mean,
    Min,
    Max,
}

impl Default for FitnessAggregation {
    fn default() -> Self {
        FitnessAggregation::Mean
    }
}

/// A named, stateful scorer producing one scalar fitness per individual per
/// generation. The score itself is accumulated externally (by the evaluation
/// phase or an in-process evaluator); this struct owns the aggregation and
/// the per-generation statistics.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FitnessFunction {
    name: String,
    prototype_name: String,
    pub aggregation: FitnessAggregation,
    /// Fitness accumulated during the current try.
    current_fitness: f64,
    /// Completed tries of the current individual.
    fitness_of_tries: Vec<f64>,
    /// Aggregated fitness of every completed individual this generation.
    fitness_of_individuals: Vec<f64>,
    max_fitness: f64,
    min_fitness: f64,
    mean_fitness: f64,
    variance: f64,
}

impl FitnessFunction {
    pub fn new(name: &str, prototype_name: &str) -> Self {
        FitnessFunction {
            name: name.to_string(),
            prototype_name: prototype_name.to_string(),
            aggregation: FitnessAggregation::Mean,
            current_fitness: 0.0,
            fitness_of_tries: Vec::new(),
            fitness_of_individuals: Vec::new(),
            max_fitness: 0.0,
            min_fitness: 0.0,
            mean_fitness: 0.0,
            variance: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prototype_name(&self) -> &str {
        &self.prototype_name
    }

    pub fn set_current_fitness(&mut self, fitness: f64) {
        self.current_fitness = fitness;
    }

    /// The aggregate of the tries completed so far for the current
    /// individual, under the configured aggregation mode.
    pub fn fitness(&self) -> f64 {
        if self.fitness_of_tries.is_empty() {
            return self.current_fitness;
        }
        match self.aggregation {
            FitnessAggregation::Mean => {
                self.fitness_of_tries.iter().sum::<f64>() / self.fitness_of_tries.len() as f64
            }
            FitnessAggregation::Min => self
                .fitness_of_tries
                .iter()
                .cloned()
                .fold(f64::INFINITY, f64::min),
            FitnessAggregation::Max => self
                .fitness_of_tries
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max),
        }
    }

    pub fn max_fitness(&self) -> f64 {
        self.max_fitness
    }

    pub fn mean_fitness(&self) -> f64 {
        self.mean_fitness
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    // Lifecycle hooks, invoked by the evaluation phase.

    pub fn reset_try(&mut self) {
        self.current_fitness = 0.0;
    }

    pub fn finish_try(&mut self) {
        self.fitness_of_tries.push(self.current_fitness);
    }

    pub fn finish_individual(&mut self) {
        let fitness = self.fitness();
        self.fitness_of_individuals.push(fitness);
        if fitness > self.max_fitness {
            self.max_fitness = fitness;
        }
        if fitness < self.min_fitness {
            self.min_fitness = fitness;
        }
        self.fitness_of_tries.clear();
        self.current_fitness = 0.0;
    }

    pub fn finish_generation(&mut self) {
        if !self.fitness_of_individuals.is_empty() {
            self.mean_fitness = self.fitness_of_individuals.as_slice().mean();
            self.variance = self.fitness_of_individuals.as_slice().population_variance();
        }
        self.fitness_of_individuals.clear();
        self.max_fitness = 0.0;
        self.min_fitness = 0.0;
    }
}

/// Registry of fitness-function prototypes, part of the run's evolution
/// context. Supports creating a named copy of a named prototype, which is
/// how command-line-configured fitness and fitness re-created from a saved
/// name both work.
#[derive(Clone, Debug, Default)]
pub struct FitnessRegistry {
    prototypes: HashMap<String, FitnessFunction>,
}

impl FitnessRegistry {
    pub fn new() -> Self {
        FitnessRegistry {
            prototypes: HashMap::new(),
        }
    }

    pub fn register_prototype(&mut self, prototype: FitnessFunction) -> bool {
        if self.prototypes.contains_key(prototype.name()) {
            warn!(
                "FitnessRegistry: prototype [{}] is already registered.",
                prototype.name()
            );
            return false;
        }
        self.prototypes
            .insert(prototype.name().to_string(), prototype);
        true
    }

    /// Creates a copy of the named prototype under a new name. Returns
    /// `None` (and logs) when the prototype is unknown.
    pub fn create_copy(&self, prototype_name: &str, new_name: &str) -> Option<FitnessFunction> {
        match self.prototypes.get(prototype_name) {
            Some(prototype) => {
                let mut copy = prototype.clone();
                copy.name = new_name.to_string();
                copy.prototype_name = prototype_name.to_string();
                Some(copy)
            }
            None => {
                warn!(
                    "FitnessRegistry: unknown fitness prototype [{}].",
                    prototype_name
                );
                None
            }
        }
    }

    pub fn prototype_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prototypes.keys().cloned().collect();
        names.sort();
        names
    }
}
