use crate::network::{NeuralNetwork, Properties};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Ids wrap around at this bound to stay printable and diff-friendly in
/// generation dumps.
const MAX_INDIVIDUAL_ID: u32 = 2_000_000_000;

/// Monotonic individual id source, owned by the evolution context.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IdGenerator {
    next: u32,
}

impl IdGenerator {
    pub fn new() -> Self {
        IdGenerator { next: 1 }
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = if self.next >= MAX_INDIVIDUAL_ID {
            1
        } else {
            self.next + 1
        };
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator::new()
    }
}

/// A single evolvable unit: genome, phenotype, fitness scores, lineage and
/// the genome protection flag.
///
/// Lineage is kept as a list of parent ids rather than references: parents
/// live in (and are owned by) the previous generation, which may already be
/// pending destruction when a child is processed.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Individual {
    /// Unique id, assigned by the context's `IdGenerator`.
    pub id: u32,
    /// The evolvable representation. `None` until a construction operator
    /// created one (fresh seed individuals start without a genome).
    pub genome: Option<NeuralNetwork>,
    /// The expressed form of the genome, produced by the genotype-phenotype
    /// mapper before evaluation. `None` means the genome doubles as the
    /// phenotype.
    pub phenotype: Option<NeuralNetwork>,
    /// Ids of the parents this individual was bred from, in selection order.
    pub parents: Vec<u32>,
    /// Fitness per fitness-function name. A missing key reads as 0.0.
    fitness: HashMap<String, f64>,
    /// While set, the genome must not be touched by mutation operators.
    protected: bool,
    /// Dynamic tags and debug metadata.
    #[serde(default)]
    pub properties: Properties,
}

impl Individual {
    pub fn new(id: u32) -> Self {
        Individual {
            id,
            genome: None,
            phenotype: None,
            parents: Vec::new(),
            fitness: HashMap::new(),
            protected: false,
            properties: Properties::new(),
        }
    }

    pub fn set_genome(&mut self, genome: NeuralNetwork) {
        self.genome = Some(genome);
    }

    pub fn set_phenotype(&mut self, phenotype: NeuralNetwork) {
        self.phenotype = Some(phenotype);
    }

    /// The network to evaluate: the explicit phenotype if one was mapped,
    /// otherwise the genome itself.
    pub fn effective_phenotype(&self) -> Option<&NeuralNetwork> {
        self.phenotype.as_ref().or(self.genome.as_ref())
    }

    /// Returns the recorded fitness for the named fitness function, or 0.0
    /// if no value was recorded (or the name is empty).
    pub fn fitness(&self, name: &str) -> f64 {
        self.fitness.get(name).copied().unwrap_or(0.0)
    }

    /// Records a fitness value. A no-op on an empty function name. Also
    /// leaves a human-readable debug property on the individual.
    pub fn set_fitness(&mut self, name: &str, value: f64) {
        if name.is_empty() {
            return;
        }
        self.fitness.insert(name.to_string(), value);
        self.properties
            .set(&format!("Fit - {}", name), format!("{}", value));
    }

    pub fn clear_fitness(&mut self) {
        self.fitness.clear();
    }

    /// Names of all fitness functions with a recorded value, sorted for
    /// deterministic iteration.
    pub fn fitness_function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fitness.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn protect_genome(&mut self, protect: bool) {
        self.protected = protect;
    }

    pub fn is_genome_protected(&self) -> bool {
        self.protected
    }
}

impl fmt::Debug for Individual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Individual[id={}, parents={:?}, protected={}, genome={}]",
            self.id,
            self.parents,
            self.protected,
            match &self.genome {
                Some(net) => format!("{}", net),
                None => "none".to_string(),
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fitness_missing_key_reads_zero() {
        let ind = Individual::new(1);
        assert_eq!(ind.fitness(""), 0.0);
        assert_eq!(ind.fitness("Unknown"), 0.0);
    }

    #[test]
    fn test_set_fitness_records_value_and_debug_property() {
        let mut ind = Individual::new(1);
        ind.set_fitness("Script", 0.73);
        assert_eq!(ind.fitness("Script"), 0.73);
        assert_eq!(ind.properties.get("Fit - Script"), Some("0.73"));
    }

    #[test]
    fn test_set_fitness_empty_name_is_noop() {
        let mut ind = Individual::new(1);
        ind.set_fitness("", 1.0);
        assert!(ind.fitness_function_names().is_empty());
        assert!(ind.properties.is_empty());
    }

    #[test]
    fn test_clear_fitness() {
        let mut ind = Individual::new(1);
        ind.set_fitness("A", 1.0);
        ind.set_fitness("B", 2.0);
        assert_eq!(ind.fitness_function_names(), vec!["A", "B"]);
        ind.clear_fitness();
        assert!(ind.fitness_function_names().is_empty());
    }

    #[test]
    fn test_id_generator_wraps() {
        let mut gen = IdGenerator {
            next: MAX_INDIVIDUAL_ID,
        };
        assert_eq!(gen.next_id(), MAX_INDIVIDUAL_ID);
        assert_eq!(gen.next_id(), 1);
        assert_eq!(gen.next_id(), 2);
    }

    #[test]
    fn test_effective_phenotype_falls_back_to_genome() {
        let mut ind = Individual::new(1);
        assert!(ind.effective_phenotype().is_none());
        ind.set_genome(NeuralNetwork::initial(1, 1));
        assert!(ind.effective_phenotype().is_some());
        let mapped = NeuralNetwork::initial(2, 2);
        ind.set_phenotype(mapped);
        assert_eq!(ind.effective_phenotype().unwrap().neurons.len(), 4);
    }
}
