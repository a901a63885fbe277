use crate::individual::{Individual, IdGenerator};
use crate::population::Population;
use log::warn;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;

/// Creates the seed of the next generation from the current one.
///
/// Seed individuals carry parent links only; their genomes are built later
/// by the evolution algorithm. Preserved parents are the exception: they are
/// carried over as protected copies, genome included.
pub trait SelectionMethod {
    fn name(&self) -> &str;

    fn create_seed(
        &mut self,
        population: &Population,
        number_of_individuals: usize,
        number_of_preserved_parents: usize,
        number_of_parents_per_individual: usize,
        ids: &mut IdGenerator,
        rng: &mut ChaCha8Rng,
    ) -> Vec<Individual>;
}

/// Stable descending sort by the given fitness function.
fn sorted_by_fitness<'a>(population: &'a Population, fitness_name: &str) -> Vec<&'a Individual> {
    let mut sorted: Vec<&Individual> = population.individuals.iter().collect();
    sorted.sort_by(|a, b| {
        b.fitness(fitness_name)
            .partial_cmp(&a.fitness(fitness_name))
            .unwrap_or(Ordering::Equal)
    });
    sorted
}

/// Protected copies of the best parents, kept unchanged in the new
/// generation.
fn preserve_best_parents(sorted: &[&Individual], number_of_preserved_parents: usize) -> Vec<Individual> {
    sorted
        .iter()
        .take(number_of_preserved_parents)
        .map(|parent| {
            let mut preserved = (*parent).clone();
            preserved.protect_genome(true);
            preserved
        })
        .collect()
}

/// Draws tournament rivals, avoiding duplicates as long as the parent
/// generation still has unused candidates.
fn draw_rivals(parent_count: usize, number_of_rivals: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut rivals = vec![rng.gen_range(0..parent_count)];
    for _ in 0..number_of_rivals.saturating_sub(1) {
        let mut next = rivals[0];
        while rivals.contains(&next) && rivals.len() < parent_count {
            next = rng.gen_range(0..parent_count);
        }
        rivals.push(next);
    }
    rivals
}

/// Classic tournament selection: every parent slot is won by the fittest of
/// a randomly drawn group of rivals.
pub struct TournamentSelection {
    pub tournament_size: usize,
    pub responsible_fitness: String,
}

impl TournamentSelection {
    pub fn new(tournament_size: usize, responsible_fitness: &str) -> Self {
        TournamentSelection {
            tournament_size,
            responsible_fitness: responsible_fitness.to_string(),
        }
    }
}

impl SelectionMethod for TournamentSelection {
    fn name(&self) -> &str {
        "TournamentSelection"
    }

    fn create_seed(
        &mut self,
        population: &Population,
        number_of_individuals: usize,
        number_of_preserved_parents: usize,
        number_of_parents_per_individual: usize,
        ids: &mut IdGenerator,
        rng: &mut ChaCha8Rng,
    ) -> Vec<Individual> {
        let sorted = sorted_by_fitness(population, &self.responsible_fitness);
        let mut new_generation = preserve_best_parents(&sorted, number_of_preserved_parents);

        if population.fitness_function(&self.responsible_fitness).is_none() {
            warn!(
                "TournamentSelection: responsible fitness function [{}] not found in population [{}].",
                self.responsible_fitness, population.name
            );
            return new_generation;
        }

        let number_of_rivals = self.tournament_size.max(2);

        for _ in 0..number_of_individuals.saturating_sub(number_of_preserved_parents) {
            let mut new_individual = Individual::new(ids.next_id());

            if !sorted.is_empty() {
                for _ in 0..number_of_parents_per_individual {
                    let rivals = draw_rivals(sorted.len(), number_of_rivals, rng);

                    let mut best = rivals[0];
                    for &rival in &rivals {
                        if sorted[rival].fitness(&self.responsible_fitness)
                            > sorted[best].fitness(&self.responsible_fitness)
                        {
                            best = rival;
                        }
                    }
                    new_individual.parents.push(sorted[best].id);
                }
            }
            new_generation.push(new_individual);
        }
        new_generation
    }
}

/// Tournament selection over several weighted objectives, decided by a
/// pairwise dominance score instead of a single fitness value.
pub struct MultiObjectiveTournamentSelection {
    pub tournament_size: usize,
    pub responsible_fitness: String,
    /// Objectives as "name,weight;name,weight".
    pub fitness_weights: String,
}

impl MultiObjectiveTournamentSelection {
    pub fn new(tournament_size: usize, responsible_fitness: &str, fitness_weights: &str) -> Self {
        MultiObjectiveTournamentSelection {
            tournament_size,
            responsible_fitness: responsible_fitness.to_string(),
            fitness_weights: fitness_weights.to_string(),
        }
    }

    /// Parses the weight string against the population's fitness functions.
    /// Malformed, unknown and duplicate entries are logged and skipped.
    fn parse_weights(&self, population: &Population) -> Vec<(String, f64)> {
        let mut weights: Vec<(String, f64)> = Vec::new();
        for entry in self.fitness_weights.split(';').filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(',').collect();
            if parts.len() != 2 {
                warn!(
                    "MultiObjectiveTournamentSelection: could not parse entry [{}].",
                    entry
                );
                continue;
            }
            let weight = match parts[1].trim().parse::<f64>() {
                Ok(w) => w,
                Err(_) => {
                    warn!(
                        "MultiObjectiveTournamentSelection: could not parse entry [{}].",
                        entry
                    );
                    continue;
                }
            };
            let name = parts[0].trim();
            if population.fitness_function(name).is_none() {
                warn!(
                    "MultiObjectiveTournamentSelection: unknown fitness function [{}].",
                    name
                );
                continue;
            }
            if weights.iter().any(|(n, _)| n == name) {
                warn!(
                    "MultiObjectiveTournamentSelection: fitness function [{}] was specified more than once.",
                    name
                );
                continue;
            }
            weights.push((name.to_string(), weight));
        }
        weights
    }

    /// The candidate that dominates most of the others across the weighted
    /// objectives. Each pairwise comparison adds or subtracts the objective
    /// weight.
    fn best_of(candidates: &[&Individual], weights: &[(String, f64)]) -> Option<usize> {
        let mut best: Option<usize> = None;
        let mut best_dominance = f64::NEG_INFINITY;

        for (i, individual) in candidates.iter().enumerate() {
            let mut dominance = 0.0;
            for (fitness_name, weight) in weights {
                let fitness = individual.fitness(fitness_name);
                for candidate in candidates {
                    let rival_fitness = candidate.fitness(fitness_name);
                    if rival_fitness > fitness {
                        dominance -= weight;
                    } else if rival_fitness < fitness {
                        dominance += weight;
                    }
                }
            }
            if dominance > best_dominance {
                best = Some(i);
                best_dominance = dominance;
            }
        }
        best
    }
}

impl SelectionMethod for MultiObjectiveTournamentSelection {
    fn name(&self) -> &str {
        "MultiObjectiveTournamentSelection"
    }

    fn create_seed(
        &mut self,
        population: &Population,
        number_of_individuals: usize,
        number_of_preserved_parents: usize,
        number_of_parents_per_individual: usize,
        ids: &mut IdGenerator,
        rng: &mut ChaCha8Rng,
    ) -> Vec<Individual> {
        let sorted = sorted_by_fitness(population, &self.responsible_fitness);
        let mut new_generation = preserve_best_parents(&sorted, number_of_preserved_parents);

        if population.fitness_function(&self.responsible_fitness).is_none() {
            warn!(
                "MultiObjectiveTournamentSelection: responsible fitness function [{}] not found in population [{}].",
                self.responsible_fitness, population.name
            );
            return new_generation;
        }

        let weights = self.parse_weights(population);
        let number_of_rivals = self.tournament_size.max(2);

        for _ in 0..number_of_individuals.saturating_sub(number_of_preserved_parents) {
            let mut new_individual = Individual::new(ids.next_id());

            if !sorted.is_empty() {
                for _ in 0..number_of_parents_per_individual {
                    let rival_indices = draw_rivals(sorted.len(), number_of_rivals, rng);
                    let rivals: Vec<&Individual> =
                        rival_indices.iter().map(|&i| sorted[i]).collect();

                    if let Some(best) = Self::best_of(&rivals, &weights) {
                        new_individual.parents.push(rivals[best].id);
                    }
                }
            }
            new_generation.push(new_individual);
        }
        new_generation
    }
}

/// Rank-based selection where each parent's expected number of children
/// follows a softmax over the normalized fitness distribution, sampled with
/// a Poisson process.
pub struct PoissonRankingSelection {
    /// Selection pressure of the softmax birth rate.
    pub pressure: f64,
    pub responsible_fitness: String,
}

impl PoissonRankingSelection {
    pub fn new(pressure: f64, responsible_fitness: &str) -> Self {
        PoissonRankingSelection {
            pressure,
            responsible_fitness: responsible_fitness.to_string(),
        }
    }

    fn fill_up(generation: &mut Vec<Individual>, parent_id: u32, desired_size: usize, ids: &mut IdGenerator) {
        while generation.len() < desired_size {
            let mut new_individual = Individual::new(ids.next_id());
            new_individual.parents.push(parent_id);
            generation.push(new_individual);
        }
    }

    /// Knuth's Poisson sampler. The boost factor lowers the acceptance
    /// threshold on later sweeps, which yields larger counts.
    fn poisson_sample(birth_rate: f64, boost: f64, rng: &mut ChaCha8Rng) -> usize {
        let limit = (-birth_rate.abs()).exp() * boost;
        let mut number_of_children: i64 = -1;
        let mut product = 1.0;
        loop {
            number_of_children += 1;
            product *= rng.gen::<f64>();
            if product <= limit {
                break;
            }
        }
        number_of_children as usize
    }
}

impl SelectionMethod for PoissonRankingSelection {
    fn name(&self) -> &str {
        "PoissonDistributionRanking"
    }

    fn create_seed(
        &mut self,
        population: &Population,
        number_of_individuals: usize,
        number_of_preserved_parents: usize,
        _number_of_parents_per_individual: usize,
        ids: &mut IdGenerator,
        rng: &mut ChaCha8Rng,
    ) -> Vec<Individual> {
        let sorted = sorted_by_fitness(population, &self.responsible_fitness);
        let mut new_parents = preserve_best_parents(&sorted, number_of_preserved_parents);

        // generations smaller than 2 cannot carry a distribution
        if sorted.len() == 1 {
            Self::fill_up(&mut new_parents, sorted[0].id, number_of_individuals, ids);
            return new_parents;
        }
        if sorted.is_empty() {
            return new_parents;
        }

        if population.fitness_function(&self.responsible_fitness).is_none() {
            warn!(
                "PoissonDistributionRanking: responsible fitness function [{}] not found in population [{}].",
                self.responsible_fitness, population.name
            );
            return new_parents;
        }

        let gamma = self.pressure;
        let fitness_of = |individual: &Individual| individual.fitness(&self.responsible_fitness);

        let mut max_fitness = -100_000_000.0_f64;
        let mut min_fitness = 0.0_f64;
        for parent in &sorted {
            let fitness = fitness_of(parent);
            min_fitness = min_fitness.min(fitness);
            max_fitness = max_fitness.max(fitness);
        }
        min_fitness = -min_fitness;
        max_fitness += min_fitness;

        if max_fitness == min_fitness {
            warn!("PoissonDistributionRanking: all individuals have the same fitness.");
            let mut new_generation = new_parents;
            Self::fill_up(&mut new_generation, sorted[0].id, number_of_individuals, ids);
            return new_generation;
        }

        let norm_factor = 1.0 / max_fitness;

        let fitness_sum: f64 = sorted
            .iter()
            .map(|p| (min_fitness + fitness_of(p)) * norm_factor)
            .sum();
        let mean = fitness_sum / sorted.len() as f64;

        let deviation_sum: f64 = sorted
            .iter()
            .map(|p| {
                let d = mean - (min_fitness + fitness_of(p)) * norm_factor;
                d * d
            })
            .sum();
        let variance = deviation_sum / (sorted.len() - 1) as f64;

        if variance == 0.0 {
            warn!("PoissonDistributionRanking: fitness variance was 0.");
            let mut new_generation = new_parents;
            Self::fill_up(&mut new_generation, sorted[0].id, number_of_individuals, ids);
            return new_generation;
        }

        let offspring_probability_sum: f64 = sorted
            .iter()
            .map(|p| (-gamma * (1.0 - (min_fitness + fitness_of(p)) * norm_factor) / variance).exp())
            .sum();

        if offspring_probability_sum == 0.0 {
            warn!("PoissonDistributionRanking: offspring probability sum was 0.");
            let mut new_generation = new_parents;
            Self::fill_up(&mut new_generation, sorted[0].id, number_of_individuals, ids);
            return new_generation;
        }

        let desired_population_size =
            number_of_individuals.saturating_sub(number_of_preserved_parents).max(1);

        let mut new_generation: Vec<Individual> = Vec::new();
        let mut boost = 1.0;
        while number_of_individuals > new_generation.len() + new_parents.len() {
            if boost < 1.0 {
                warn!("PoissonDistributionRanking: doing another sweep with boost {boost}.");
            }
            if boost < 1.0e-6 {
                // degenerate distribution, fall back to ranked fill-up
                Self::fill_up(
                    &mut new_generation,
                    sorted[0].id,
                    number_of_individuals - new_parents.len(),
                    ids,
                );
                break;
            }
            for parent in &sorted {
                // b_i = z * e^(-gamma (1 - p_i) / sigma^2) / sum_j e^(-gamma (1 - p_j) / sigma^2)
                let birth_rate = desired_population_size as f64
                    * (-gamma * (1.0 - (min_fitness + fitness_of(parent)) * norm_factor) / variance)
                        .exp()
                    / offspring_probability_sum;

                let number_of_children = Self::poisson_sample(birth_rate, boost, rng);

                if number_of_children > 0 && !new_parents.iter().any(|p| p.id == parent.id) {
                    new_parents.push((*parent).clone());
                }
                for _ in 0..number_of_children {
                    let mut new_individual = Individual::new(ids.next_id());
                    new_individual.parents.push(parent.id);
                    new_generation.push(new_individual);
                }
            }
            boost *= 0.9;
        }

        let mut seed = new_parents;
        seed.append(&mut new_generation);
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness::FitnessFunction;
    use rand::SeedableRng;

    fn population_with_fitness(values: &[f64]) -> (Population, IdGenerator) {
        let mut ids = IdGenerator::new();
        let mut pop = Population::new("Main", values.len(), 1);
        pop.add_fitness_function(FitnessFunction::new("Score", "Script"));
        for &value in values {
            let mut ind = Individual::new(ids.next_id());
            ind.set_fitness("Score", value);
            pop.individuals.push(ind);
        }
        (pop, ids)
    }

    #[test]
    fn test_tournament_preserves_best_parent() {
        let (pop, mut ids) = population_with_fitness(&[1.0, 5.0, 3.0]);
        let best_id = pop.individuals[1].id;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut method = TournamentSelection::new(2, "Score");

        let seed = method.create_seed(&pop, 5, 1, 1, &mut ids, &mut rng);
        assert_eq!(seed.len(), 5);
        assert_eq!(seed[0].id, best_id);
        assert!(seed[0].is_genome_protected());
        for ind in &seed[1..] {
            assert_eq!(ind.parents.len(), 1);
            assert!(pop.individual(ind.parents[0]).is_some());
        }
    }

    #[test]
    fn test_tournament_missing_fitness_returns_preserved_only() {
        let (pop, mut ids) = population_with_fitness(&[1.0, 5.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut method = TournamentSelection::new(2, "DoesNotExist");

        let seed = method.create_seed(&pop, 6, 2, 1, &mut ids, &mut rng);
        assert_eq!(seed.len(), 2);
    }

    #[test]
    fn test_tournament_favors_fitter_parents() {
        let (pop, mut ids) = population_with_fitness(&[0.0, 0.0, 0.0, 10.0]);
        let best_id = pop.individuals[3].id;
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut method = TournamentSelection::new(4, "Score");

        // a tournament over all four parents is always won by the fittest
        let seed = method.create_seed(&pop, 20, 0, 1, &mut ids, &mut rng);
        assert!(seed.iter().all(|i| i.parents == vec![best_id]));
    }

    #[test]
    fn test_multi_objective_dominance_winner() {
        let (mut pop, mut ids) = population_with_fitness(&[1.0, 2.0]);
        pop.add_fitness_function(FitnessFunction::new("Speed", "Script"));
        pop.individuals[0].set_fitness("Speed", 10.0);
        pop.individuals[1].set_fitness("Speed", 0.0);
        let dominant_id = pop.individuals[0].id;

        // Speed outweighs Score, so individual 0 dominates overall
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut method =
            MultiObjectiveTournamentSelection::new(2, "Score", "Score,1;Speed,5");
        let seed = method.create_seed(&pop, 8, 0, 1, &mut ids, &mut rng);
        assert!(seed.iter().all(|i| i.parents == vec![dominant_id]));
    }

    #[test]
    fn test_multi_objective_skips_malformed_weight_entries() {
        let (pop, _) = population_with_fitness(&[1.0, 2.0]);
        let method =
            MultiObjectiveTournamentSelection::new(2, "Score", "Score,1;Broken;Nope,2;Score,9");
        let weights = method.parse_weights(&pop);
        assert_eq!(weights, vec![("Score".to_string(), 1.0)]);
    }

    #[test]
    fn test_poisson_single_parent_fill_up() {
        let (pop, mut ids) = population_with_fitness(&[4.0]);
        let parent_id = pop.individuals[0].id;
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut method = PoissonRankingSelection::new(1.0, "Score");

        let seed = method.create_seed(&pop, 4, 1, 1, &mut ids, &mut rng);
        assert_eq!(seed.len(), 4);
        assert!(seed[0].is_genome_protected());
        assert!(seed[1..].iter().all(|i| i.parents == vec![parent_id]));
    }

    #[test]
    fn test_poisson_equal_fitness_fill_up() {
        let (pop, mut ids) = population_with_fitness(&[2.0, 2.0, 2.0]);
        let first_id = pop.individuals[0].id;
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut method = PoissonRankingSelection::new(1.0, "Score");

        let seed = method.create_seed(&pop, 6, 1, 1, &mut ids, &mut rng);
        assert_eq!(seed.len(), 6);
        // degenerate distribution clones the first ranked parent
        assert_eq!(seed[0].id, first_id);
        assert!(seed[0].is_genome_protected());
        assert!(seed[1..].iter().all(|i| i.parents == vec![first_id]));
    }

    #[test]
    fn test_poisson_reaches_desired_size() {
        let (pop, mut ids) = population_with_fitness(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut method = PoissonRankingSelection::new(1.0, "Score");

        let seed = method.create_seed(&pop, 10, 2, 1, &mut ids, &mut rng);
        assert!(seed.len() >= 10);
        // the preserved prefix is exactly the two fittest, best first
        assert_eq!(seed[0].id, pop.individuals[4].id);
        assert_eq!(seed[1].id, pop.individuals[3].id);
        assert!(seed[0].is_genome_protected());
        assert!(seed[1].is_genome_protected());
    }
}
