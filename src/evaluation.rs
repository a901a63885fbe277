use crate::events::names;
use crate::groups::{create_groups, GroupMember};
use crate::network::NeuralNetwork;
use crate::population::Population;
use crate::world::EvolutionContext;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Name of the per-group result file written by the external evaluator.
pub const FITNESS_FILE_NAME: &str = "fitness.txt";
/// Prefix of the per-generation working directories.
pub const GENERATION_DIRECTORY_PREFIX: &str = "gen";
/// Individual property holding the on-disk path of the serialized phenotype.
pub const PROP_FILE_NAME: &str = "FileName";

/// Externally scores a generation's phenotypes and feeds fitness back.
pub trait EvaluationMethod {
    fn name(&self) -> &str;

    /// Current human-readable status, observable by external UIs.
    fn status_message(&self) -> &str;

    fn evaluate(&mut self, populations: &mut [Population], ctx: &EvolutionContext) -> bool;
}

/// One batch-submission request handed to the scheduler seam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSubmission {
    pub qsub_script: String,
    pub start_index: usize,
    pub end_index: usize,
    pub job_script_path: PathBuf,
    pub job_name: String,
    pub output_directory: PathBuf,
    pub priority: i64,
}

/// Closes the per-generation fitness statistics after all results arrived.
fn finish_fitness_generation(populations: &mut [Population]) {
    for population in populations.iter_mut() {
        for fitness in population.fitness_functions_mut() {
            fitness.finish_generation();
        }
    }
}

/// Seam between the evaluation method and the batch scheduler. The default
/// implementation shells out to the qsub caller script; tests inject no-ops.
pub trait JobSubmitter {
    fn submit(&self, submission: &JobSubmission) -> bool;
}

/// Submits through the configured qsub caller script.
pub struct QsubSubmitter;

impl JobSubmitter for QsubSubmitter {
    fn submit(&self, submission: &JobSubmission) -> bool {
        let status = Command::new("/bin/bash")
            .arg(&submission.qsub_script)
            .arg(submission.start_index.to_string())
            .arg(submission.end_index.to_string())
            .arg(&submission.job_script_path)
            .arg(&submission.job_name)
            .arg(&submission.output_directory)
            .arg(submission.priority.to_string())
            .status();
        match status {
            Ok(status) if status.success() => true,
            Ok(_) => {
                error!("Cluster evaluation: submitting job was not successful.");
                false
            }
            Err(e) => {
                error!("Cluster evaluation: could not run qsub caller: {e}");
                false
            }
        }
    }
}

/// Completion handle for one evaluation group. The external worker pool is a
/// black box reachable only through the filesystem, so completion is
/// observed by polling the result file.
pub struct EvaluationJob {
    pub group_index: usize,
    pub result_file: PathBuf,
}

impl EvaluationJob {
    pub fn new(generation_directory: &Path, group_index: usize) -> Self {
        EvaluationJob {
            group_index,
            result_file: generation_directory
                .join(group_index.to_string())
                .join(FITNESS_FILE_NAME),
        }
    }

    /// The parsed result if the file is readable, in deterministic key
    /// order. `name=value` lines; `#` comments and lines without a
    /// separator are skipped.
    pub fn poll(&self) -> Option<BTreeMap<String, f64>> {
        let content = fs::read_to_string(&self.result_file).ok()?;
        let mut results = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            let value: f64 = value.trim().parse().unwrap_or(0.0);
            results.insert(name.trim().to_string(), value);
        }
        Some(results)
    }
}

/// Evaluation via an external batch scheduler (Sun Grid Engine style): the
/// phenotypes of every evaluation group are serialized into per-group
/// directories, a job array is submitted, and fitness results are collected
/// from the groups' result files with a bounded re-submission loop.
pub struct ClusterEvaluationMethod {
    pub working_dir: PathBuf,
    pub application: String,
    pub agent_interfaces: Vec<String>,
    pub number_of_retries: usize,
    pub number_of_steps: usize,
    pub job_script_name: String,
    pub qsub_script: String,
    pub priority: i64,
    submitter: Box<dyn JobSubmitter>,
    status_message: String,
    generation_directory: PathBuf,
    job_script_location: PathBuf,
    application_parameter: String,
    open_evaluations: Vec<usize>,
}

impl ClusterEvaluationMethod {
    pub fn new(param: &crate::param::Evaluation, submitter: Box<dyn JobSubmitter>) -> Self {
        ClusterEvaluationMethod {
            working_dir: PathBuf::from(&param.working_dir),
            application: param.application.clone(),
            agent_interfaces: param
                .agent_interfaces
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            number_of_retries: param.number_of_retries,
            number_of_steps: param.number_of_steps,
            job_script_name: param.job_script_name.clone(),
            qsub_script: param.qsub_script.clone(),
            priority: param.priority,
            submitter,
            status_message: String::new(),
            generation_directory: PathBuf::new(),
            job_script_location: PathBuf::new(),
            application_parameter: String::new(),
            open_evaluations: Vec::new(),
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        info!("Cluster evaluation: {}", self.status_message);
    }

    fn reset(&mut self) {
        self.open_evaluations.clear();
        self.application_parameter.clear();
        self.job_script_location = PathBuf::new();
    }

    /// Creates the per-group directories, materializes phenotypes to
    /// `network<j>.onn` files and assembles the evaluator's command-line
    /// parameters. Per-individual failures are skipped, never fatal.
    pub fn prepare_evaluation(
        &mut self,
        populations: &mut [Population],
        groups: &[Vec<GroupMember>],
    ) -> bool {
        let mut interfaces = self.agent_interfaces.clone();
        if interfaces.is_empty() {
            interfaces.push(String::new());
        }
        if interfaces.len() != populations.len() {
            self.set_status("wrong number of agent interfaces.");
            error!("Cluster evaluation: wrong number of agent interfaces.");
            return false;
        }

        self.application_parameter = format!(
            " -logFit $EVAL_DIR/{FITNESS_FILE_NAME} -steps {} ",
            self.number_of_steps
        );

        for (i, group) in groups.iter().enumerate() {
            let group_directory = self.generation_directory.join((i + 1).to_string());
            if let Err(e) = fs::create_dir_all(&group_directory) {
                error!(
                    "Cluster evaluation: could not create directory {}: {e}. Skipping group.",
                    group_directory.display()
                );
                continue;
            }
            for (j, member) in group.iter().enumerate() {
                let network_name = format!("network{j}.onn");
                let population = &mut populations[member.population_index];
                let Some(mapper) = population.mapper.as_ref() else {
                    warn!(
                        "Cluster evaluation: population [{}] has no genotype-phenotype mapper. Skipping individual.",
                        population.name
                    );
                    continue;
                };
                let individual = &mut population.individuals[member.individual_index];
                let phenotype = individual
                    .genome
                    .as_ref()
                    .and_then(|genome| mapper.create_phenotype(genome));
                let Some(phenotype) = phenotype else {
                    warn!(
                        "Cluster evaluation: could not apply mapper to individual [{}]. Skipping individual.",
                        individual.id
                    );
                    continue;
                };

                let file_path = group_directory.join(&network_name);
                if let Err(e) = fs::write(&file_path, phenotype.to_onn_xml()) {
                    self.status_message = format!("cannot create file {}.", file_path.display());
                    error!("Cluster evaluation: cannot create file {}: {e}", file_path.display());
                    continue;
                }
                individual.set_phenotype(phenotype);
                individual
                    .properties
                    .set(PROP_FILE_NAME, file_path.display().to_string());

                if i == 0 {
                    self.application_parameter.push_str(&format!(
                        " -net {} $EVAL_DIR/{network_name} ",
                        interfaces[member.population_index]
                    ));
                }
            }
        }

        // fitness specs: one entry per fitness function per population
        for (k, population) in populations.iter().enumerate() {
            for fitness in population.fitness_functions() {
                self.application_parameter.push_str(&format!(
                    " -fit {} {} {} ",
                    interfaces[k],
                    fitness.prototype_name(),
                    fitness.name()
                ));
            }
        }
        self.set_status("saved individuals to file.");
        true
    }

    /// The POSIX job script submitted to the scheduler. Each task resolves
    /// its group directory from the task id and waits up to ten seconds for
    /// the directory to appear on shared storage.
    pub fn create_job_script(&self) -> String {
        let mut script = String::new();
        script.push_str("#!/bin/sh\n\n");
        script.push_str("TASK_ID=$1\n");
        script.push_str("ARGUMENT_POSTFIX=\n\n");
        script.push_str("if [ \"${SGE_TASK_ID}\" != \"undefined\" -a \"x${SGE_TASK_ID}\" != \"x\" ]\n");
        script.push_str("then TASK_ID=$SGE_TASK_ID\n");
        script.push_str("else\n");
        script.push_str("  if [ $# -eq 0 ]\n");
        script.push_str("  then TASK_ID=1\n");
        script.push_str("  fi\n");
        script.push_str("fi\n");
        script.push_str(&format!(
            "EVAL_DIR={}/$TASK_ID\n\n",
            self.generation_directory.display()
        ));
        script.push_str("if [ \"x$TASK_ID\" = \"x\" ]\n");
        script.push_str("then exit 1\n");
        script.push_str("fi\n\n");
        script.push_str("i=1\n");
        script.push_str("MAX_RETRIES=10\n");
        script.push_str("while [ ! -d $EVAL_DIR -a $i -le $MAX_RETRIES ]\n");
        script.push_str("do\n");
        script.push_str("sleep 1\n");
        script.push_str("i=`expr $i + 1`\n");
        script.push_str("done\n");
        script.push_str("if [ ! -d $EVAL_DIR ]\n");
        script.push_str("then exit 1\n");
        script.push_str("fi\n\n");
        script.push_str("if [ $# -gt 0 ]\n");
        script.push_str("then shift\n");
        script.push_str("fi\n");
        script.push_str("cd $EVAL_DIR\n");
        script.push_str(&format!(
            "{}{} $ARGUMENT_POSTFIX $*\n\n",
            self.application, self.application_parameter
        ));
        script.push_str("exit 0\n");
        script
    }

    /// Writes the job script, executable, into the generation directory.
    pub fn save_job_script(&mut self, content: &str) -> bool {
        let file_name = self.generation_directory.join(&self.job_script_name);
        let result = fs::File::create(&file_name)
            .and_then(|mut file| file.write_all(content.as_bytes()));
        if let Err(e) = result {
            error!(
                "Cluster evaluation: could not write job script {}: {e}",
                file_name.display()
            );
            return false;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&file_name, fs::Permissions::from_mode(0o755)) {
                warn!("Cluster evaluation: could not mark job script executable: {e}");
            }
        }
        self.job_script_location = file_name;
        true
    }

    /// Submits the job array for groups `start..=end` (1-based).
    pub fn submit_job(&mut self, start_index: usize, end_index: usize, ctx: &EvolutionContext) -> bool {
        let output_directory = self.generation_directory.join("QOutput");
        let output_directory = match fs::create_dir_all(&output_directory) {
            Ok(_) => output_directory,
            Err(_) => {
                warn!(
                    "Cluster evaluation: scheduler output directory could not be created. Writing output to /dev/null."
                );
                PathBuf::from("/dev/null")
            }
        };
        let submission = JobSubmission {
            qsub_script: self.qsub_script.clone(),
            start_index,
            end_index,
            job_script_path: self.job_script_location.clone(),
            job_name: format!("{}{}", self.job_script_name, ctx.current_generation),
            output_directory,
            priority: self.priority,
        };
        let ok = self.submitter.submit(&submission);
        ctx.events.trigger(names::CLUSTER_JOB_SUBMITTED);
        ok
    }

    fn assign_results(
        populations: &mut [Population],
        groups: &[Vec<GroupMember>],
        group_index: usize,
        results: &BTreeMap<String, f64>,
        ctx: &EvolutionContext,
    ) {
        for (name, &value) in results {
            if ctx.is_shutting_down() {
                return;
            }
            let mut found = false;
            for (k, population) in populations.iter_mut().enumerate() {
                if population.fitness_function(name).is_none() {
                    continue;
                }
                let Some(member) = groups[group_index]
                    .iter()
                    .find(|m| m.population_index == k)
                else {
                    continue;
                };
                let Some(individual) = population.individuals.get_mut(member.individual_index)
                else {
                    error!(
                        "Cluster evaluation: evaluation group member is not part of the population."
                    );
                    continue;
                };
                individual.set_fitness(name, value);
                if let Some(fitness) = population.fitness_function_mut(name) {
                    fitness.reset_try();
                    fitness.set_current_fitness(value);
                    fitness.finish_try();
                    fitness.finish_individual();
                }
                found = true;
            }
            if !found {
                warn!(
                    "Cluster evaluation: found a fitness result [{name}] that doesn't belong to any population."
                );
            }
            ctx.events.trigger(names::INDIVIDUAL_COMPLETED);
        }
    }

    /// Collects the per-group result files and assigns fitness values by
    /// group/population alignment. Unreadable groups are recorded for
    /// re-submission, never failed immediately.
    pub fn read_evaluation_results(
        &mut self,
        populations: &mut [Population],
        groups: &[Vec<GroupMember>],
        ctx: &EvolutionContext,
    ) -> bool {
        self.open_evaluations.clear();
        self.set_status("start loading fitness results.");

        for i in 0..groups.len() {
            if ctx.is_shutting_down() {
                return true;
            }
            let job = EvaluationJob::new(&self.generation_directory, i + 1);
            match job.poll() {
                Some(results) => {
                    Self::assign_results(populations, groups, i, &results, ctx);
                }
                None => {
                    self.open_evaluations.push(i + 1);
                    warn!(
                        "Cluster evaluation: could not load file {}.",
                        job.result_file.display()
                    );
                    if self.number_of_retries == 0 {
                        self.set_status(format!(
                            "could not load fitness file for evaluation group {}! Skipping individual!",
                            i + 1
                        ));
                    }
                }
            }
        }

        if !self.open_evaluations.is_empty() {
            self.perform_necessary_resubmits(populations, groups, ctx);
        }
        self.set_status("loaded fitness results from files.");
        true
    }

    /// Re-submits exactly the groups still missing results, up to
    /// `number_of_retries` rounds. Exhaustion degrades to "no fitness this
    /// generation" for the affected individuals.
    fn perform_necessary_resubmits(
        &mut self,
        populations: &mut [Population],
        groups: &[Vec<GroupMember>],
        ctx: &EvolutionContext,
    ) {
        let mut current_try = 0;
        while !self.open_evaluations.is_empty()
            && current_try < self.number_of_retries
            && !ctx.is_shutting_down()
        {
            let pending = std::mem::take(&mut self.open_evaluations);
            for &group_index in &pending {
                if ctx.is_shutting_down() {
                    return;
                }
                self.set_status(format!("resubmitting evaluation group {group_index}"));
                self.submit_job(group_index, group_index, ctx);
            }

            self.set_status("start loading fitness results.");
            for &group_index in &pending {
                if ctx.is_shutting_down() {
                    return;
                }
                let job = EvaluationJob::new(&self.generation_directory, group_index);
                match job.poll() {
                    Some(results) => {
                        Self::assign_results(populations, groups, group_index - 1, &results, ctx);
                    }
                    None => {
                        warn!(
                            "Cluster evaluation: could not load file {}.",
                            job.result_file.display()
                        );
                        if current_try == self.number_of_retries - 1 {
                            self.set_status(format!(
                                "could not load fitness file for evaluation group {group_index}! Skipping individual!"
                            ));
                        } else {
                            self.open_evaluations.push(group_index);
                        }
                    }
                }
            }
            current_try += 1;
        }
    }
}

impl EvaluationMethod for ClusterEvaluationMethod {
    fn name(&self) -> &str {
        "ClusterEvaluation"
    }

    fn status_message(&self) -> &str {
        &self.status_message
    }

    fn evaluate(&mut self, populations: &mut [Population], ctx: &EvolutionContext) -> bool {
        self.reset();
        self.set_status(format!(
            "~starting evaluation of generation {}",
            ctx.current_generation
        ));

        self.generation_directory = self.working_dir.join(format!(
            "{GENERATION_DIRECTORY_PREFIX}{}",
            ctx.current_generation
        ));
        if let Err(e) = fs::create_dir_all(&self.generation_directory) {
            error!(
                "Cluster evaluation: could not create generation directory {}: {e}",
                self.generation_directory.display()
            );
            return false;
        }
        if ctx.checkpoint() {
            return true;
        }

        let groups = create_groups(populations);

        if !self.prepare_evaluation(populations, &groups) {
            self.set_status("preparing evaluation was not successful. Quitting evaluation!");
            return false;
        }
        if ctx.checkpoint() {
            return true;
        }

        let script = self.create_job_script();
        if !self.save_job_script(&script) {
            self.set_status("saving job script was not successful. Quitting evaluation!");
            return false;
        }
        if ctx.checkpoint() {
            return true;
        }
        self.set_status("job script for grid engine created and saved.");

        self.set_status(format!(
            "submitting evaluation job for generation {}...",
            ctx.current_generation
        ));
        if !self.submit_job(1, groups.len(), ctx) {
            self.set_status("submitting and performing job was not successful. Quitting evaluation!");
            return false;
        }
        if ctx.checkpoint() {
            return true;
        }

        self.set_status("evaluation terminated. Reading fitness results.");
        if !self.read_evaluation_results(populations, &groups, ctx) {
            self.set_status("reading evaluation results was not successful. Quitting evaluation!");
            return false;
        }
        if ctx.checkpoint() {
            return true;
        }

        finish_fitness_generation(populations);
        self.set_status(format!(
            "evaluation of generation {} finished!",
            ctx.current_generation
        ));
        true
    }
}

/// Scores phenotypes through an in-process evaluator function. Same mapper
/// and fitness lifecycle semantics as the cluster method, without the batch
/// scheduler round trip.
pub struct LocalEvaluationMethod {
    evaluator: Box<dyn FnMut(&NeuralNetwork) -> Vec<(String, f64)>>,
    status_message: String,
}

impl LocalEvaluationMethod {
    pub fn new(evaluator: Box<dyn FnMut(&NeuralNetwork) -> Vec<(String, f64)>>) -> Self {
        LocalEvaluationMethod {
            evaluator,
            status_message: String::new(),
        }
    }
}

impl EvaluationMethod for LocalEvaluationMethod {
    fn name(&self) -> &str {
        "LocalEvaluation"
    }

    fn status_message(&self) -> &str {
        &self.status_message
    }

    fn evaluate(&mut self, populations: &mut [Population], ctx: &EvolutionContext) -> bool {
        self.status_message = format!(
            "starting local evaluation of generation {}",
            ctx.current_generation
        );
        for population in populations.iter_mut() {
            if population.mapper.is_none() {
                warn!(
                    "Local evaluation: population [{}] has no genotype-phenotype mapper. Skipping population.",
                    population.name
                );
                continue;
            }
            for index in 0..population.individuals.len() {
                if ctx.checkpoint() {
                    return true;
                }
                // Re-fetch the mapper per individual so its borrow ends
                // before the fitness functions are updated below.
                let individual = &population.individuals[index];
                let Some(phenotype) = population
                    .mapper
                    .as_ref()
                    .zip(individual.genome.as_ref())
                    .and_then(|(mapper, genome)| mapper.create_phenotype(genome))
                else {
                    warn!(
                        "Local evaluation: could not apply mapper to individual [{}]. Skipping individual.",
                        population.individuals[index].id
                    );
                    continue;
                };

                let results = (self.evaluator)(&phenotype);
                let individual = &mut population.individuals[index];
                individual.set_phenotype(phenotype);
                for (name, value) in &results {
                    individual.set_fitness(name, *value);
                }
                for (name, value) in &results {
                    if let Some(fitness) = population.fitness_function_mut(name) {
                        fitness.reset_try();
                        fitness.set_current_fitness(*value);
                        fitness.finish_try();
                        fitness.finish_individual();
                    }
                }
                ctx.events.trigger(names::INDIVIDUAL_COMPLETED);
            }
        }
        finish_fitness_generation(populations);
        self.status_message = "local evaluation finished.".to_string();
        true
    }
}
