use crate::fitness::FitnessAggregation;
use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::BufReader;

/// Which selection method a population uses.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum SelectionKind {
    Tournament,
    MultiObjectiveTournament,
    PoissonRanking,
}

/// Which evaluation method the world uses.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum EvaluationKind {
    Local,
    Cluster,
}

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub mutation: Mutation,
    #[serde(default)]
    pub evaluation: Evaluation,
    #[serde(default = "populations_default")]
    pub populations: Vec<PopulationParam>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    #[serde(default = "seed_default")]
    pub seed: u64,
    #[serde(default = "max_generations_default")]
    pub max_generations: usize,
    #[serde(default = "empty_string")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "world_name_default")]
    pub world_name: String,
    #[serde(default = "save_run_default")]
    pub save_run: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PopulationParam {
    #[serde(default = "population_name_default")]
    pub name: String,
    #[serde(default = "desired_size_default")]
    pub desired_size: usize,
    #[serde(default = "preserved_parents_default")]
    pub preserved_parents: usize,
    #[serde(default = "selection_default")]
    pub selection: Vec<SelectionParam>,
    #[serde(default = "fitness_default")]
    pub fitness_functions: Vec<FitnessParam>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SelectionParam {
    #[serde(default = "selection_kind_default")]
    pub method: SelectionKind,
    /// Relative share of the next generation this method produces.
    #[serde(default = "one_f64_default")]
    pub proportion: f64,
    #[serde(default = "tournament_size_default")]
    pub tournament_size: usize,
    /// Selection pressure of the Poisson-ranking method.
    #[serde(default = "one_f64_default")]
    pub pressure: f64,
    /// Responsible fitness function, by name.
    #[serde(default = "fitness_name_default")]
    pub responsible_fitness: String,
    /// Weighted objectives of the multi-objective tournament, as
    /// "name,weight;name,weight".
    #[serde(default = "empty_string")]
    pub fitness_weights: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FitnessParam {
    #[serde(default = "fitness_name_default")]
    pub name: String,
    #[serde(default = "fitness_prototype_default")]
    pub prototype: String,
    #[serde(default)]
    pub aggregation: FitnessAggregation,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Mutation {
    #[serde(default = "false_default")]
    pub enable_mutation_history: bool,
    #[serde(default = "initial_inputs_default")]
    pub initial_inputs: usize,
    #[serde(default = "initial_outputs_default")]
    pub initial_outputs: usize,
    #[serde(default = "insert_probability_default")]
    pub insert_neuron_probability: f64,
    #[serde(default = "max_hidden_neurons_default")]
    pub max_hidden_neurons: usize,
    #[serde(default = "insert_synapse_probability_default")]
    pub insert_synapse_probability: f64,
    #[serde(default = "max_synapses_default")]
    pub max_synapses: usize,
    #[serde(default = "change_probability_default")]
    pub change_bias_probability: f64,
    #[serde(default = "deviation_default")]
    pub change_bias_deviation: f64,
    #[serde(default = "change_probability_default")]
    pub change_strength_probability: f64,
    #[serde(default = "deviation_default")]
    pub change_strength_deviation: f64,
    #[serde(default = "remove_probability_default")]
    pub remove_neuron_probability: f64,
    #[serde(default = "max_applications_default")]
    pub max_applications: usize,
    /// Dump the last genome state of discarded individuals to a file.
    #[serde(default = "false_default")]
    pub dump_discarded_genomes: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Evaluation {
    #[serde(default = "evaluation_kind_default")]
    pub method: EvaluationKind,
    #[serde(default = "working_dir_default")]
    pub working_dir: String,
    /// Evaluator executable invoked by the job script.
    #[serde(default = "empty_string")]
    pub application: String,
    /// Comma-separated agent interface names, one per population.
    #[serde(default = "empty_string")]
    pub agent_interfaces: String,
    #[serde(default = "number_of_retries_default")]
    pub number_of_retries: usize,
    #[serde(default = "number_of_steps_default")]
    pub number_of_steps: usize,
    #[serde(default = "job_script_name_default")]
    pub job_script_name: String,
    #[serde(default = "qsub_script_default")]
    pub qsub_script: String,
    #[serde(default = "zero_i64_default")]
    pub priority: i64,
}

// Default section definitions

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Mutation {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Evaluation {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for PopulationParam {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for SelectionParam {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for FitnessParam {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Param {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn get(param_file: String) -> Result<Param, Box<dyn Error>> {
    let param_file_reader = File::open(param_file)?;
    let param_reader = BufReader::new(param_file_reader);

    let mut config: Param = serde_yaml::from_reader(param_reader)?;

    validate(&mut config)?;

    Ok(config)
}

pub fn validate(param: &mut Param) -> Result<(), String> {
    if param.populations.is_empty() {
        return Err("At least one population must be configured.".to_string());
    }

    for population in &param.populations {
        if population.preserved_parents > population.desired_size {
            return Err(format!(
                "Population [{}]: preserved_parents ({}) exceeds desired_size ({}).",
                population.name, population.preserved_parents, population.desired_size
            ));
        }
        let mut names: Vec<&str> = population
            .fitness_functions
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        names.sort();
        names.dedup();
        if names.len() != population.fitness_functions.len() {
            return Err(format!(
                "Population [{}]: fitness function names must be unique.",
                population.name
            ));
        }
        for selection in &population.selection {
            if selection.proportion < 0.0 {
                return Err(format!(
                    "Population [{}]: selection proportion must not be negative.",
                    population.name
                ));
            }
            if selection.method == SelectionKind::Tournament && selection.tournament_size < 2 {
                warn!(
                    "Population [{}]: tournament_size < 2, a minimum of 2 rivals is used.",
                    population.name
                );
            }
        }
    }

    if param.evaluation.method == EvaluationKind::Cluster {
        let interfaces = param
            .evaluation
            .agent_interfaces
            .split(',')
            .filter(|s| !s.is_empty())
            .count();
        // a single empty entry is substituted for single-population worlds
        if interfaces != param.populations.len() && param.populations.len() > 1 {
            return Err(format!(
                "Cluster evaluation requires one agent interface per population ({} configured, {} populations).",
                interfaces,
                param.populations.len()
            ));
        }
        if param.evaluation.number_of_retries == 0 {
            warn!("number_of_retries is 0: lost evaluation jobs will not be re-submitted.");
        }
    }

    if param.mutation.initial_outputs == 0 {
        return Err("initial_outputs must be at least 1.".to_string());
    }

    Ok(())
}

// Default value definitions

fn seed_default() -> u64 {
    4815162342
}
fn empty_string() -> String {
    "".to_string()
}
fn max_generations_default() -> usize {
    100
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn world_name_default() -> String {
    "World".to_string()
}
fn save_run_default() -> String {
    "".to_string()
}
fn population_name_default() -> String {
    "Main".to_string()
}
fn desired_size_default() -> usize {
    50
}
fn preserved_parents_default() -> usize {
    1
}
fn selection_default() -> Vec<SelectionParam> {
    vec![SelectionParam::default()]
}
fn fitness_default() -> Vec<FitnessParam> {
    vec![FitnessParam::default()]
}
fn selection_kind_default() -> SelectionKind {
    SelectionKind::Tournament
}
fn tournament_size_default() -> usize {
    2
}
fn one_f64_default() -> f64 {
    1.0
}
fn fitness_name_default() -> String {
    "Script".to_string()
}
fn fitness_prototype_default() -> String {
    "Script".to_string()
}
fn false_default() -> bool {
    false
}
fn initial_inputs_default() -> usize {
    2
}
fn initial_outputs_default() -> usize {
    1
}
fn insert_probability_default() -> f64 {
    0.3
}
fn max_hidden_neurons_default() -> usize {
    30
}
fn insert_synapse_probability_default() -> f64 {
    0.6
}
fn max_synapses_default() -> usize {
    200
}
fn change_probability_default() -> f64 {
    0.5
}
fn deviation_default() -> f64 {
    0.2
}
fn remove_probability_default() -> f64 {
    0.05
}
fn max_applications_default() -> usize {
    15
}
fn evaluation_kind_default() -> EvaluationKind {
    EvaluationKind::Local
}
fn working_dir_default() -> String {
    "evolution".to_string()
}
fn number_of_retries_default() -> usize {
    5
}
fn number_of_steps_default() -> usize {
    1000
}
fn job_script_name_default() -> String {
    "evalJob".to_string()
}
fn qsub_script_default() -> String {
    "qsubCaller.sh".to_string()
}
fn zero_i64_default() -> i64 {
    0
}
fn populations_default() -> Vec<PopulationParam> {
    vec![PopulationParam::default()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let mut param = Param::new();
        assert!(validate(&mut param).is_ok());
        assert_eq!(param.general.seed, 4815162342);
        assert_eq!(param.populations.len(), 1);
        assert_eq!(param.populations[0].selection.len(), 1);
    }

    #[test]
    fn test_yaml_parsing_with_partial_sections() {
        let yaml = "
general:
  seed: 7
  max_generations: 3
populations:
  - name: Walkers
    desired_size: 20
    preserved_parents: 2
";
        let mut param: Param = serde_yaml::from_str(yaml).unwrap();
        assert!(validate(&mut param).is_ok());
        assert_eq!(param.general.seed, 7);
        assert_eq!(param.populations[0].name, "Walkers");
        assert_eq!(param.populations[0].desired_size, 20);
        // untouched sections keep their defaults
        assert_eq!(param.evaluation.number_of_retries, 5);
    }

    #[test]
    fn test_validate_rejects_preserved_above_desired() {
        let mut param = Param::new();
        param.populations[0].preserved_parents = 100;
        param.populations[0].desired_size = 10;
        assert!(validate(&mut param).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_fitness_names() {
        let mut param = Param::new();
        param.populations[0].fitness_functions = vec![
            FitnessParam::default(),
            FitnessParam::default(),
        ];
        assert!(validate(&mut param).is_err());
    }

    #[test]
    fn test_validate_cluster_interface_count() {
        let mut param = Param::new();
        param.evaluation.method = EvaluationKind::Cluster;
        param.populations.push(PopulationParam {
            name: "Second".to_string(),
            ..PopulationParam::default()
        });
        param.evaluation.agent_interfaces = "Agent1".to_string();
        assert!(validate(&mut param).is_err());
        param.evaluation.agent_interfaces = "Agent1,Agent2".to_string();
        assert!(validate(&mut param).is_ok());
    }
}
