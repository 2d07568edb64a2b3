use std::fmt;

use rand::{distributions::WeightedIndex, prelude::Distribution, seq::SliceRandom, Rng};

use super::action::softmax;
use super::genome::{cross_over, Genome};
use super::innovation::InnovationContext;
use super::organism::{OrganismIndex, Organisms};
use super::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpeciesId(pub usize);

/// A cluster of organisms within compatibility distance of a representative.
///
/// Members are indices into the population's organisms; the species never
/// owns them. `members` is kept sorted by ascending fitness after
/// [`Species::adjust_fitness`], so the champion is the last member.
#[derive(Debug, Clone)]
pub struct Species {
    pub id: SpeciesId,
    pub members: Vec<OrganismIndex>,
    pub representative: Genome,
    pub age: usize,
    /// Generations since `best_fitness` last improved.
    pub stagnation: usize,
    pub shared_fitness: f64,
    pub best_fitness: f64,
    pub champion: Option<OrganismIndex>,
    pub champion_fitness: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesReport {
    pub id: SpeciesId,
    pub size: usize,
    pub shared_fitness: f64,
    pub champion_fitness: f64,
    pub age: usize,
    pub stagnant: bool,
}

impl fmt::Display for SpeciesReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "species {:>4} | size {:>4} | shared fitness {:>10.4} | champion {:>10.4} | age {:>4}{}",
            self.id.0,
            self.size,
            self.shared_fitness,
            self.champion_fitness,
            self.age,
            if self.stagnant { " | stagnant" } else { "" }
        )
    }
}

impl Species {
    pub fn create(id: SpeciesId, founder: OrganismIndex, genome: &Genome) -> Species {
        Species {
            id,
            members: vec![founder],
            representative: genome.clone(),
            age: 0,
            stagnation: 0,
            shared_fitness: 0.,
            best_fitness: f64::NEG_INFINITY,
            champion: None,
            champion_fitness: f64::NEG_INFINITY,
        }
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_compatible(&self, genome: &Genome, settings: &Settings) -> bool {
        genome.distance(&self.representative, settings) < settings.species_distance_threshold
    }

    pub fn is_stagnant(&self, settings: &Settings) -> bool {
        self.stagnation > settings.stagnation_allowance
    }

    /// Shrinks the species to one random member, which becomes the new
    /// representative. Returns that member.
    pub fn reset_representative<R: Rng>(&mut self, rng: &mut R, organisms: &Organisms) -> Option<OrganismIndex> {
        let &representative = self.members.choose(rng)?;
        let genome = &organisms.get(representative)?.genome;
        self.representative = genome.clone();
        self.members.clear();
        self.members.push(representative);
        Some(representative)
    }

    /// Sorts members by ascending fitness, computes the shared fitness and
    /// updates the champion and stagnation counter.
    pub fn adjust_fitness(&mut self, organisms: &Organisms) {
        self.members.sort_by(|&a, &b| organisms.fitness(a).total_cmp(&organisms.fitness(b)));

        if self.members.is_empty() {
            self.shared_fitness = 0.;
            self.champion = None;
            return;
        }

        let total: f64 = self.members.iter().map(|&m| organisms.fitness(m)).sum();
        self.shared_fitness = total / self.members.len() as f64;

        self.champion = self.members.last().copied();
        self.champion_fitness = self.champion.map_or(f64::NEG_INFINITY, |c| organisms.fitness(c));

        if self.champion_fitness > self.best_fitness {
            self.best_fitness = self.champion_fitness;
            self.stagnation = 0;
        } else {
            self.stagnation += 1;
        }
    }

    /// Removes the worst `1 - survival_rate` share of members and returns them.
    /// Species with fewer than three members are left alone.
    pub fn kill(&mut self, organisms: &mut Organisms, survival_rate: f64) -> Vec<OrganismIndex> {
        let n_members = self.members.len();
        if n_members < 3 {
            return Vec::new();
        }

        self.members.sort_by(|&a, &b| organisms.fitness(a).total_cmp(&organisms.fitness(b)));
        let n_killed = ((1. - survival_rate) * n_members as f64).floor() as usize;
        let n_killed = std::cmp::min(n_killed, n_members - 1);
        let killed: Vec<OrganismIndex> = self.members.drain(..n_killed).collect();
        for &index in &killed {
            if let Some(organism) = organisms.get_mut(index) {
                organism.species = None;
            }
        }
        killed
    }

    pub fn should_go_extinct(&self, settings: &Settings) -> bool {
        self.members.len() < 2 && self.age > settings.extinction_age
    }

    /// Detaches every member and returns them.
    pub fn go_extinct(&mut self, organisms: &mut Organisms) -> Vec<OrganismIndex> {
        let freed: Vec<OrganismIndex> = self.members.drain(..).collect();
        for &index in &freed {
            if let Some(organism) = organisms.get_mut(index) {
                organism.species = None;
            }
        }
        freed
    }

    fn select_parent<R: Rng>(&self, rng: &mut R, organisms: &Organisms, dist: &Option<WeightedIndex<f64>>) -> Option<OrganismIndex> {
        let chosen = match dist {
            Some(dist) => self.members.get(dist.sample(rng)).copied(),
            None => self.members.choose(rng).copied(),
        };
        chosen.filter(|&m| organisms.get(m).is_some())
    }

    /// Picks two parents by softmax of their fitness (possibly the same one
    /// twice), crosses them over and mutates the child once.
    pub fn breed<R: Rng>(&self, rng: &mut R, organisms: &Organisms, ctx: &mut InnovationContext, settings: &Settings) -> Option<Genome> {
        let fitnesses: Vec<f64> = self.members.iter().map(|&m| organisms.fitness(m)).collect();
        let dist = WeightedIndex::new(softmax(&fitnesses)).ok();

        let parent_1 = self.select_parent(rng, organisms, &dist)?;
        let parent_2 = self.select_parent(rng, organisms, &dist)?;
        let (org_1, org_2) = (&organisms[parent_1], &organisms[parent_2]);

        let mut child = cross_over(rng, &org_1.genome, org_1.fitness, &org_2.genome, org_2.fitness);
        child.mutate(rng, ctx, settings);
        Some(child)
    }

    pub fn report(&self, settings: &Settings) -> SpeciesReport {
        SpeciesReport {
            id: self.id,
            size: self.members.len(),
            shared_fitness: self.shared_fitness,
            champion_fitness: self.champion_fitness,
            age: self.age,
            stagnant: self.is_stagnant(settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neat::{action::ActionSpace, organism::Organism};
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn setup(fitnesses: &[f64]) -> (Xoshiro256PlusPlus, InnovationContext, Settings, Organisms, Species) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(21);
        let mut ctx = InnovationContext::new();
        let settings = Settings::standard(2, ActionSpace::continuous(1));
        let mut organisms = Organisms::default();
        for &fitness in fitnesses {
            let mut org = Organism::create_from_genome(Genome::init(&mut rng, &mut ctx, &settings));
            org.fitness = fitness;
            org.species = Some(SpeciesId(0));
            organisms.push(org);
        }
        let mut species = Species::create(SpeciesId(0), OrganismIndex(0), &organisms[OrganismIndex(0)].genome);
        species.members = organisms.indices().collect();
        (rng, ctx, settings, organisms, species)
    }

    #[test]
    fn adjust_fitness_shares_and_sorts() {
        let (_, _, _, organisms, mut species) = setup(&[3., 1., 2., 6.]);
        species.adjust_fitness(&organisms);
        assert_approx_eq!(species.shared_fitness, 3.);
        assert_eq!(species.members, vec![OrganismIndex(1), OrganismIndex(2), OrganismIndex(0), OrganismIndex(3)]);
        assert_eq!(species.champion, Some(OrganismIndex(3)));
        assert_eq!(species.champion_fitness, 6.);
        assert_eq!(species.stagnation, 0);

        species.adjust_fitness(&organisms);
        assert_eq!(species.stagnation, 1);
    }

    #[test]
    fn kill_removes_worst_fraction() {
        let (_, _, _, mut organisms, mut species) = setup(&[5., 1., 4., 2., 3.]);
        let killed = species.kill(&mut organisms, 0.5);
        // floor(0.5 * 5) = 2 worst
        assert_eq!(killed, vec![OrganismIndex(1), OrganismIndex(3)]);
        assert_eq!(species.members, vec![OrganismIndex(4), OrganismIndex(2), OrganismIndex(0)]);
        assert!(organisms[OrganismIndex(1)].species.is_none());
        assert_eq!(organisms[OrganismIndex(0)].species, Some(SpeciesId(0)));
    }

    #[test]
    fn kill_spares_small_species() {
        let (_, _, _, mut organisms, mut species) = setup(&[1., 2.]);
        assert!(species.kill(&mut organisms, 0.1).is_empty());
        assert_eq!(species.size(), 2);
    }

    #[test]
    fn kill_always_keeps_one() {
        let (_, _, _, mut organisms, mut species) = setup(&[1., 2., 3.]);
        let killed = species.kill(&mut organisms, 0.01);
        assert_eq!(killed.len(), 2);
        assert_eq!(species.members, vec![OrganismIndex(2)]);
    }

    #[test]
    fn extinction() {
        let (_, _, settings, mut organisms, mut species) = setup(&[1.]);
        assert!(!species.should_go_extinct(&settings));
        species.age = settings.extinction_age + 1;
        assert!(species.should_go_extinct(&settings));
        let freed = species.go_extinct(&mut organisms);
        assert_eq!(freed, vec![OrganismIndex(0)]);
        assert!(species.is_empty());
        assert!(organisms[OrganismIndex(0)].species.is_none());
    }

    #[test]
    fn reset_representative_keeps_one_member() {
        let (mut rng, _, _, organisms, mut species) = setup(&[1., 2., 3.]);
        let rep = species.reset_representative(&mut rng, &organisms).unwrap();
        assert_eq!(species.members, vec![rep]);
        assert_approx_eq!(species.representative.distance(&organisms[rep].genome, &Settings::default()), 0.);
    }

    #[test]
    fn breed_returns_mutated_child_of_members() {
        let (mut rng, mut ctx, settings, organisms, species) = setup(&[1., 2., 3.]);
        let child = species.breed(&mut rng, &organisms, &mut ctx, &settings).unwrap();
        assert_eq!(child.input_ids().len(), 2);
        assert!(child.check_layer_ordering());
    }

    #[test]
    fn stagnation_flag() {
        let (_, _, settings, organisms, mut species) = setup(&[1.]);
        species.adjust_fitness(&organisms);
        for _ in 0..=settings.stagnation_allowance {
            species.adjust_fitness(&organisms);
        }
        assert!(species.is_stagnant(&settings));
        assert!(species.report(&settings).stagnant);
        assert!(species.report(&settings).to_string().contains("stagnant"));
    }
}
