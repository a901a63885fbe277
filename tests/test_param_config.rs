/// Configuration loading tests: YAML parsing with defaulted fields and the
/// validation rules guarding population and cluster settings.
use nevo::param::{self, EvaluationKind, Param, SelectionKind};
use std::fs;
use tempfile::TempDir;

fn load(yaml: &str) -> Result<Param, Box<dyn std::error::Error>> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("param.yaml");
    fs::write(&path, yaml).unwrap();
    param::get(path.display().to_string())
}

#[test]
fn test_minimal_yaml_falls_back_to_defaults() {
    let param = load("general:\n  seed: 7\n").unwrap();
    assert_eq!(param.general.seed, 7);
    assert_eq!(param.general.max_generations, 100);
    assert_eq!(param.populations.len(), 1);
    assert_eq!(param.populations[0].name, "Main");
    assert_eq!(param.populations[0].desired_size, 50);
    assert_eq!(param.populations[0].selection[0].method, SelectionKind::Tournament);
    assert_eq!(param.populations[0].fitness_functions[0].name, "Script");
}

#[test]
fn test_full_yaml_round_trip() {
    let yaml = "\
general:
  seed: 99
  max_generations: 20
  world_name: Walker
mutation:
  insert_neuron_probability: 0.2
  max_hidden_neurons: 12
evaluation:
  method: Cluster
  working_dir: /tmp/eval
  application: nerdSim
  agent_interfaces: Walker
  number_of_retries: 2
populations:
  - name: Walker
    desired_size: 30
    preserved_parents: 3
    selection:
      - method: PoissonRanking
        pressure: 1.5
        responsible_fitness: Distance
    fitness_functions:
      - name: Distance
        prototype: Script
";
    let param = load(yaml).unwrap();
    assert_eq!(param.general.world_name, "Walker");
    assert_eq!(param.mutation.max_hidden_neurons, 12);
    assert_eq!(param.evaluation.method, EvaluationKind::Cluster);
    assert_eq!(param.evaluation.number_of_retries, 2);
    assert_eq!(param.populations[0].selection[0].method, SelectionKind::PoissonRanking);
    assert_eq!(param.populations[0].selection[0].pressure, 1.5);

    // values survive a serialize/deserialize cycle unchanged
    let serialized = serde_yaml::to_string(&param).unwrap();
    let reparsed: Param = serde_yaml::from_str(&serialized).unwrap();
    assert_eq!(reparsed, param);
}

#[test]
fn test_preserved_parents_beyond_desired_size_is_rejected() {
    let yaml = "\
populations:
  - name: Main
    desired_size: 5
    preserved_parents: 6
";
    assert!(load(yaml).is_err());
}

#[test]
fn test_duplicate_fitness_names_are_rejected() {
    let yaml = "\
populations:
  - name: Main
    fitness_functions:
      - name: Script
      - name: Script
";
    assert!(load(yaml).is_err());
}

#[test]
fn test_cluster_interface_count_must_match_populations() {
    let yaml = "\
evaluation:
  method: Cluster
  agent_interfaces: OnlyOne
populations:
  - name: A
  - name: B
";
    assert!(load(yaml).is_err());
}

#[test]
fn test_single_population_may_omit_agent_interfaces() {
    let yaml = "\
evaluation:
  method: Cluster
populations:
  - name: Main
";
    assert!(load(yaml).is_ok());
}

#[test]
fn test_negative_selection_proportion_is_rejected() {
    let yaml = "\
populations:
  - name: Main
    selection:
      - method: Tournament
        proportion: -0.5
";
    assert!(load(yaml).is_err());
}
