use std::ops::{Index, IndexMut};

use rayon::prelude::*;

use super::genome::Genome;
use super::species::SpeciesId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrganismIndex(pub usize);

/// One individual of the population: a genome plus its bookkeeping for the
/// current generation.
#[derive(Debug, Clone)]
pub struct Organism {
    pub genome: Genome,
    pub fitness: f64,
    pub species: Option<SpeciesId>,
    /// Set once the organism's episode has ended in the current generation.
    pub done: bool,
}

impl Organism {
    pub fn create_from_genome(genome: Genome) -> Organism {
        Organism {
            genome,
            fitness: 0.,
            species: None,
            done: false,
        }
    }

    pub fn reset(&mut self) {
        self.fitness = 0.;
        self.done = false;
        self.genome.clear_values();
    }
}

#[derive(Debug, Clone, Default)]
pub struct Organisms(Vec<Organism>);

impl Organisms {
    pub fn new(data: Vec<Organism>) -> Organisms {
        Organisms(data)
    }

    pub fn push(&mut self, organism: Organism) {
        self.0.push(organism);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<Organism> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<Organism> {
        self.0.iter_mut()
    }

    pub fn indices(&self) -> impl Iterator<Item = OrganismIndex> {
        (0..self.0.len()).map(OrganismIndex)
    }

    pub fn get(&self, index: OrganismIndex) -> Option<&Organism> {
        self.0.get(index.0)
    }

    pub fn get_mut(&mut self, index: OrganismIndex) -> Option<&mut Organism> {
        self.0.get_mut(index.0)
    }

    pub fn fitness(&self, index: OrganismIndex) -> f64 {
        self.0.get(index.0).map_or(0., |o| o.fitness)
    }
}

impl Index<OrganismIndex> for Organisms {
    type Output = Organism;
    fn index(&self, index: OrganismIndex) -> &Self::Output {
        &self.0[index.0]
    }
}

impl IndexMut<OrganismIndex> for Organisms {
    fn index_mut(&mut self, index: OrganismIndex) -> &mut Self::Output {
        &mut self.0[index.0]
    }
}

impl<'a> IntoParallelRefMutIterator<'a> for Organisms {
    type Item = &'a mut Organism;
    type Iter = rayon::slice::IterMut<'a, Organism>;

    fn par_iter_mut(&'a mut self) -> Self::Iter {
        self.0.par_iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neat::{action::ActionSpace, innovation::InnovationContext, settings::Settings};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn organisms(n: usize) -> Organisms {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut ctx = InnovationContext::new();
        let settings = Settings::standard(2, ActionSpace::continuous(1));
        Organisms::new((0..n).map(|_| Organism::create_from_genome(Genome::init(&mut rng, &mut ctx, &settings))).collect())
    }

    #[test]
    fn organism_reset_clears_generation_state() {
        let mut orgs = organisms(1);
        let org = &mut orgs[OrganismIndex(0)];
        org.fitness = 3.;
        org.done = true;
        org.genome.evaluate(&[1., 1.]);
        org.reset();
        assert_eq!(org.fitness, 0.);
        assert!(!org.done);
    }

    #[test]
    fn indices_cover_collection() {
        let orgs = organisms(10);
        let indices: Vec<OrganismIndex> = orgs.indices().collect();
        assert_eq!(indices.len(), 10);
        assert!(indices.iter().all(|&i| orgs.get(i).is_some()));
        assert!(orgs.get(OrganismIndex(10)).is_none());
    }

    #[test]
    fn parallel_activation() {
        let mut orgs = organisms(8);
        orgs.par_iter_mut().for_each(|org| {
            org.fitness = org.genome.evaluate(&[0.5, 0.5])[0];
        });
        assert!(orgs.iter().all(|o| o.fitness.is_finite()));
    }
}
