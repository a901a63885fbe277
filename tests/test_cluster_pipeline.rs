/// Cluster evaluation pipeline against a fake scheduler: phenotype files and
/// job script on disk, fitness collection, and the re-submission loop.
use nevo::evaluation::{
    ClusterEvaluationMethod, EvaluationMethod, JobSubmission, JobSubmitter, FITNESS_FILE_NAME,
};
use nevo::fitness::FitnessFunction;
use nevo::individual::Individual;
use nevo::network::NeuralNetwork;
use nevo::param::Evaluation;
use nevo::population::{IdentityMapper, Population};
use nevo::world::EvolutionContext;
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::TempDir;

/// Plays the role of the grid engine: on submission, immediately writes a
/// fitness file for every group in the submitted range.
struct FakeScheduler {
    generation_directory: PathBuf,
    fitness_line: String,
    submissions: Rc<RefCell<usize>>,
}

impl JobSubmitter for FakeScheduler {
    fn submit(&self, submission: &JobSubmission) -> bool {
        *self.submissions.borrow_mut() += 1;
        for group in submission.start_index..=submission.end_index {
            let group_dir = self.generation_directory.join(group.to_string());
            fs::create_dir_all(&group_dir).unwrap();
            fs::write(group_dir.join(FITNESS_FILE_NAME), &self.fitness_line).unwrap();
        }
        true
    }
}

/// Never produces any result file.
struct SilentScheduler;

impl JobSubmitter for SilentScheduler {
    fn submit(&self, _: &JobSubmission) -> bool {
        true
    }
}

fn population_of(name: &str, fitness: &str, size: usize) -> Population {
    let mut pop = Population::new(name, size, 0);
    pop.mapper = Some(Box::new(IdentityMapper));
    pop.add_fitness_function(FitnessFunction::new(fitness, "Script"));
    for id in 0..size {
        let mut ind = Individual::new(id as u32 + 1000);
        ind.set_genome(NeuralNetwork::initial(2, 1));
        pop.individuals.push(ind);
    }
    pop
}

fn evaluation_params(dir: &TempDir, retries: usize) -> Evaluation {
    let mut param = Evaluation::default();
    param.working_dir = dir.path().display().to_string();
    param.application = "nerdSim".to_string();
    param.number_of_retries = retries;
    param
}

#[test]
fn test_pipeline_assigns_fitness_from_scheduler_results() {
    let dir = TempDir::new().unwrap();
    let ctx = EvolutionContext::new(Arc::new(AtomicBool::new(false)));
    let submissions = Rc::new(RefCell::new(0));
    let mut method = ClusterEvaluationMethod::new(
        &evaluation_params(&dir, 0),
        Box::new(FakeScheduler {
            generation_directory: dir.path().join("gen0"),
            fitness_line: "Script=2.25\n".to_string(),
            submissions: submissions.clone(),
        }),
    );
    let mut populations = vec![population_of("Main", "Script", 3)];

    assert!(method.evaluate(&mut populations, &ctx));
    assert_eq!(*submissions.borrow(), 1);
    for individual in &populations[0].individuals {
        assert_eq!(individual.fitness("Script"), 2.25);
    }
    // the job script landed next to the group directories, ready to run
    let script_path = dir.path().join("gen0").join("evalJob");
    let script = fs::read_to_string(&script_path).unwrap();
    assert!(script.contains("EVAL_DIR="));
    assert!(script.contains("nerdSim"));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&script_path).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }
}

#[test]
fn test_two_population_groups_receive_their_own_fitness() {
    let dir = TempDir::new().unwrap();
    let ctx = EvolutionContext::new(Arc::new(AtomicBool::new(false)));
    let submissions = Rc::new(RefCell::new(0));
    let mut param = evaluation_params(&dir, 0);
    param.agent_interfaces = "Left,Right".to_string();
    let mut method = ClusterEvaluationMethod::new(
        &param,
        Box::new(FakeScheduler {
            generation_directory: dir.path().join("gen0"),
            fitness_line: "Forward=1.0\nBalance=-0.5\n".to_string(),
            submissions: submissions.clone(),
        }),
    );
    let mut populations = vec![
        population_of("Left", "Forward", 2),
        population_of("Right", "Balance", 2),
    ];

    assert!(method.evaluate(&mut populations, &ctx));
    for individual in &populations[0].individuals {
        assert_eq!(individual.fitness("Forward"), 1.0);
        assert_eq!(individual.fitness("Balance"), 0.0);
    }
    for individual in &populations[1].individuals {
        assert_eq!(individual.fitness("Balance"), -0.5);
    }
}

#[test]
fn test_silent_scheduler_exhausts_retries_and_skips() {
    let dir = TempDir::new().unwrap();
    let ctx = EvolutionContext::new(Arc::new(AtomicBool::new(false)));
    let mut method =
        ClusterEvaluationMethod::new(&evaluation_params(&dir, 2), Box::new(SilentScheduler));
    let mut populations = vec![population_of("Main", "Script", 2)];

    assert!(method.evaluate(&mut populations, &ctx));
    for individual in &populations[0].individuals {
        assert_eq!(individual.fitness("Script"), 0.0);
    }
    assert!(method.status_message().contains("finished"));
}

#[test]
fn test_interface_count_mismatch_aborts_evaluation() {
    let dir = TempDir::new().unwrap();
    let ctx = EvolutionContext::new(Arc::new(AtomicBool::new(false)));
    let mut param = evaluation_params(&dir, 0);
    param.agent_interfaces = "OnlyOne".to_string();
    let mut method = ClusterEvaluationMethod::new(&param, Box::new(SilentScheduler));
    let mut populations = vec![
        population_of("A", "FitA", 1),
        population_of("B", "FitB", 1),
    ];

    assert!(!method.evaluate(&mut populations, &ctx));
    assert!(method.status_message().contains("Quitting evaluation"));
}
