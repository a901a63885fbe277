use crate::fitness::FitnessFunction;
use crate::individual::Individual;
use crate::network::NeuralNetwork;
use crate::selection::SelectionMethod;
use log::warn;
use std::fmt;

/// Translates a genome into the phenotype that actually gets evaluated.
///
/// Returning `None` marks the genome as unmappable; the evaluation phase
/// skips such individuals instead of failing the whole generation.
pub trait GenotypePhenotypeMapper {
    fn name(&self) -> &str;
    fn create_phenotype(&self, genome: &NeuralNetwork) -> Option<NeuralNetwork>;
}

/// Mapper for direct-encoded populations where the genome is the phenotype.
pub struct IdentityMapper;

impl GenotypePhenotypeMapper for IdentityMapper {
    fn name(&self) -> &str {
        "Identity"
    }

    fn create_phenotype(&self, genome: &NeuralNetwork) -> Option<NeuralNetwork> {
        Some(genome.clone())
    }
}

/// A selection method attached to a population together with the share of
/// the next generation it is responsible for.
pub struct SelectionEntry {
    pub method: Box<dyn SelectionMethod>,
    pub proportion: f64,
}

/// A named set of individuals evolved together, with its attached selection
/// methods, fitness functions and genotype-phenotype mapper.
pub struct Population {
    pub name: String,
    pub individuals: Vec<Individual>,
    pub selections: Vec<SelectionEntry>,
    fitness_functions: Vec<FitnessFunction>,
    pub mapper: Option<Box<dyn GenotypePhenotypeMapper>>,
    pub desired_population_size: usize,
    pub number_of_preserved_parents: usize,
}

impl Population {
    pub fn new(name: &str, desired_population_size: usize, number_of_preserved_parents: usize) -> Population {
        Population {
            name: name.to_string(),
            individuals: Vec::new(),
            selections: Vec::new(),
            fitness_functions: Vec::new(),
            mapper: None,
            desired_population_size,
            number_of_preserved_parents,
        }
    }

    /// Current (actual) population size, as opposed to the desired one.
    pub fn population_size(&self) -> usize {
        self.individuals.len()
    }

    /// Attaches a selection method with its population proportion.
    /// Duplicate method names are rejected.
    pub fn add_selection_method(&mut self, method: Box<dyn SelectionMethod>, proportion: f64) -> bool {
        if self.selections.iter().any(|s| s.method.name() == method.name()) {
            warn!(
                "Population [{}]: selection method [{}] is already attached.",
                self.name,
                method.name()
            );
            return false;
        }
        self.selections.push(SelectionEntry { method, proportion });
        true
    }

    pub fn remove_selection_method(&mut self, name: &str) -> bool {
        let before = self.selections.len();
        self.selections.retain(|s| s.method.name() != name);
        before != self.selections.len()
    }

    /// Attaches a fitness function. Names must be unique per population.
    pub fn add_fitness_function(&mut self, fitness_function: FitnessFunction) -> bool {
        if self
            .fitness_functions
            .iter()
            .any(|f| f.name() == fitness_function.name())
        {
            warn!(
                "Population [{}]: fitness function [{}] is already attached.",
                self.name,
                fitness_function.name()
            );
            return false;
        }
        self.fitness_functions.push(fitness_function);
        true
    }

    pub fn remove_fitness_function(&mut self, name: &str) -> bool {
        let before = self.fitness_functions.len();
        self.fitness_functions.retain(|f| f.name() != name);
        before != self.fitness_functions.len()
    }

    /// Exact-name lookup, first match.
    pub fn fitness_function(&self, name: &str) -> Option<&FitnessFunction> {
        self.fitness_functions.iter().find(|f| f.name() == name)
    }

    pub fn fitness_function_mut(&mut self, name: &str) -> Option<&mut FitnessFunction> {
        self.fitness_functions.iter_mut().find(|f| f.name() == name)
    }

    pub fn fitness_functions(&self) -> &[FitnessFunction] {
        &self.fitness_functions
    }

    pub fn fitness_functions_mut(&mut self) -> &mut [FitnessFunction] {
        &mut self.fitness_functions
    }

    pub fn individual(&self, id: u32) -> Option<&Individual> {
        self.individuals.iter().find(|i| i.id == id)
    }
}

impl fmt::Debug for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Population")
            .field("name", &self.name)
            .field("individuals", &self.individuals.len())
            .field("desired_population_size", &self.desired_population_size)
            .field("number_of_preserved_parents", &self.number_of_preserved_parents)
            .finish()
    }
}
