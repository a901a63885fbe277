use crate::population::Population;

/// One slot inside an evaluation group: which population and which of its
/// individuals take part in the joint evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMember {
    pub population_index: usize,
    pub individual_index: usize,
}

/// Aligns individuals across populations for joint evaluation.
///
/// The number of groups equals the size of the largest population. Smaller
/// populations wrap around by modulo, so their individuals are reused across
/// several groups. Empty populations take part in no group.
pub fn create_groups(populations: &[Population]) -> Vec<Vec<GroupMember>> {
    let max_individual_number = populations
        .iter()
        .map(|p| p.individuals.len())
        .max()
        .unwrap_or(0);

    let mut groups = Vec::with_capacity(max_individual_number);
    for group_index in 0..max_individual_number {
        let mut group = Vec::new();
        for (population_index, population) in populations.iter().enumerate() {
            let size = population.individuals.len();
            if size == 0 {
                continue;
            }
            group.push(GroupMember {
                population_index,
                individual_index: group_index % size,
            });
        }
        groups.push(group);
    }
    groups
}
