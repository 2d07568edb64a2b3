use std::fmt;

use itertools::Itertools;
use rand::{distributions::WeightedIndex, prelude::Distribution, seq::SliceRandom, Rng};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use tracing::{debug, info};

use super::action::Action;
use super::error::{NeatError, NeatResult};
use super::genome::Genome;
use super::innovation::InnovationContext;
use super::organism::{Organism, OrganismIndex, Organisms};
use super::settings::Settings;
use super::species::{Species, SpeciesId, SpeciesReport};

/// Computes the fitness of one genome in-process.
pub trait SinglePlayerArena {
    fn evaluate(&self, genome: &mut Genome) -> f64;
}

/// Fitness accumulated outside the population, read once per generation.
pub trait FitnessSignal {
    fn fitness(&self, organism: OrganismIndex) -> f64;
    fn reset_fitness(&mut self, organism: OrganismIndex);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Running,
    Terminal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub generation: usize,
    pub best_fitness: f64,
    pub species: Vec<SpeciesReport>,
}

impl fmt::Display for GenerationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "generation {} | species {} | best fitness {:.4}", self.generation, self.species.len(), self.best_fitness)?;
        for s in &self.species {
            writeln!(f, "  {}", s)?;
        }
        Ok(())
    }
}

/// The whole evolving population plus the session's innovation registry.
///
/// A generation boundary runs speciate, fitness sharing, culling, extinction
/// and reproduction in that order. Once `max_generations` boundaries have run
/// the population is terminal and every further call is a no-op.
pub struct Population {
    pub organisms: Organisms,
    pub species: Vec<Species>,
    pub innovation: InnovationContext,
    pub settings: Settings,
    pub generation: usize,
    next_species_id: usize,
    best: Option<(Genome, f64)>,
    elapsed: f64,
    state: TrainerState,
}

impl Population {
    pub fn init<R: Rng>(rng: &mut R, settings: Settings) -> NeatResult<Population> {
        settings.validate()?;
        let mut innovation = InnovationContext::new();

        debug!(target: "neat", "initializing population of {}", settings.n_organisms);
        let organisms = (0..settings.n_organisms)
            .map(|_| Organism::create_from_genome(Genome::init(rng, &mut innovation, &settings)))
            .collect_vec();

        Ok(Population::create(rng, settings, innovation, Organisms::new(organisms)))
    }

    /// Starts a session from an existing genome. The registry is seeded from
    /// its connections and every organism is a weight-mutated copy.
    pub fn init_from_genome<R: Rng>(rng: &mut R, settings: Settings, genome: &Genome) -> NeatResult<Population> {
        settings.validate()?;
        if genome.input_ids().len() != settings.n_sensor_nodes {
            return Err(NeatError::InputLengthMismatch {
                expected: settings.n_sensor_nodes,
                actual: genome.input_ids().len(),
            });
        }
        if *genome.action_space() != settings.action_space {
            return Err(NeatError::InvalidActionSpace(format!(
                "seed genome has {:?}, settings ask for {:?}",
                genome.action_space(),
                settings.action_space
            )));
        }

        let innovation = InnovationContext::from_genome(genome);
        let organisms = (0..settings.n_organisms)
            .map(|_| {
                let mut copy = genome.clone();
                copy.mutate_connections(rng, &settings);
                Organism::create_from_genome(copy)
            })
            .collect_vec();

        Ok(Population::create(rng, settings, innovation, Organisms::new(organisms)))
    }

    fn create<R: Rng>(rng: &mut R, settings: Settings, innovation: InnovationContext, organisms: Organisms) -> Population {
        let mut res = Population {
            organisms,
            species: Vec::new(),
            innovation,
            settings,
            generation: 0,
            next_species_id: 0,
            best: None,
            elapsed: 0.,
            state: TrainerState::Running,
        };
        res.speciate(rng);
        res
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state == TrainerState::Terminal
    }

    /// Best genome seen so far and its fitness, refreshed once per generation.
    pub fn best(&self) -> Option<(&Genome, f64)> {
        self.best.as_ref().map(|(g, f)| (g, *f))
    }

    pub fn act(&mut self, organism: OrganismIndex, observations: &[f64]) -> NeatResult<Action> {
        match self.organisms.get_mut(organism) {
            Some(org) => org.genome.act(observations),
            None => Err(NeatError::UnknownOrganism(organism.0)),
        }
    }

    pub fn mark_done(&mut self, organism: OrganismIndex) {
        if let Some(org) = self.organisms.get_mut(organism) {
            org.done = true;
        }
    }

    pub fn all_done(&self) -> bool {
        self.organisms.iter().all(|o| o.done)
    }

    /// Runs `arena` on every organism in parallel and stores the fitness.
    pub fn evaluate_single_player<A: SinglePlayerArena + Sync>(&mut self, arena: &A) {
        self.organisms.par_iter_mut().for_each(|org| {
            org.genome.clear_values();
            org.fitness = arena.evaluate(&mut org.genome);
            org.done = true;
        });
    }

    pub fn collect_fitness<S: FitnessSignal>(&mut self, signal: &mut S) {
        for index in self.organisms.indices().collect_vec() {
            self.organisms[index].fitness = signal.fitness(index);
            signal.reset_fitness(index);
        }
    }

    /// Advances the generation clock by `dt`. The boundary fires once the
    /// horizon has elapsed or every organism is done.
    pub fn advance<R: Rng, S: FitnessSignal>(&mut self, rng: &mut R, dt: f64, signal: &mut S) -> Option<GenerationReport> {
        if self.is_terminal() {
            return None;
        }
        self.elapsed += dt;
        if self.elapsed >= self.settings.generation_horizon || self.all_done() {
            self.collect_fitness(signal);
            self.next_generation(rng)
        } else {
            None
        }
    }

    pub fn next_generation<R: Rng>(&mut self, rng: &mut R) -> Option<GenerationReport> {
        if self.is_terminal() {
            return None;
        }

        self.speciate(rng);
        self.adjust_fitness();
        let report = self.report();
        info!(
            target: "neat",
            generation = report.generation,
            n_species = report.species.len(),
            best_fitness = report.best_fitness,
            "generation evaluated"
        );
        debug!(target: "neat", "\n{}", report);

        let mut orphans = self.cull();
        orphans.extend(self.remove_extinct_species());
        self.reproduce(rng, orphans);
        self.assign_orphans();

        for s in self.species.iter_mut() {
            s.age += 1;
        }
        for org in self.organisms.iter_mut() {
            org.reset();
        }
        self.elapsed = 0.;
        self.generation += 1;
        if self.generation >= self.settings.max_generations {
            self.state = TrainerState::Terminal;
            info!(target: "neat", generation = self.generation, "training finished");
        }
        Some(report)
    }

    fn assign_species(&mut self, organism_index: OrganismIndex) {
        let genome = &self.organisms[organism_index].genome;
        let species_index = self.species.iter().position(|s| s.is_compatible(genome, &self.settings));

        let species_id = match species_index {
            Some(index) => {
                self.species[index].members.push(organism_index);
                self.species[index].id
            }
            None => {
                let id = SpeciesId(self.next_species_id);
                self.next_species_id += 1;
                self.species.push(Species::create(id, organism_index, genome));
                debug!(target: "neat", "gen: {}; new species {}", self.generation, id.0);
                id
            }
        };
        self.organisms[organism_index].species = Some(species_id);
    }

    /// Every species shrinks to one random representative, then every other
    /// organism joins the first compatible species or founds a new one.
    fn speciate<R: Rng>(&mut self, rng: &mut R) {
        self.species.retain(|s| !s.is_empty());
        for org in self.organisms.iter_mut() {
            org.species = None;
        }

        let mut representatives = FxHashSet::default();
        for s in self.species.iter_mut() {
            if let Some(rep) = s.reset_representative(rng, &self.organisms) {
                representatives.insert(rep);
                self.organisms[rep].species = Some(s.id);
            }
        }

        for index in self.organisms.indices().collect_vec() {
            if !representatives.contains(&index) {
                self.assign_species(index);
            }
        }
    }

    fn adjust_fitness(&mut self) {
        for s in self.species.iter_mut() {
            s.adjust_fitness(&self.organisms);
        }

        let champion = self
            .species
            .iter()
            .filter_map(|s| s.champion.map(|c| (c, s.champion_fitness)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((index, fitness)) = champion {
            if self.best.as_ref().map_or(true, |(_, best)| fitness > *best) {
                self.best = Some((self.organisms[index].genome.clone(), fitness));
            }
        }
    }

    /// Organisms left without a species after reproduction (reseeded ones,
    /// or those whose parents could not breed) keep their genome and are
    /// placed like any other organism.
    fn assign_orphans(&mut self) {
        let orphans = self.organisms.indices().filter(|&i| self.organisms[i].species.is_none()).collect_vec();
        for index in orphans {
            self.assign_species(index);
        }
    }

    fn cull(&mut self) -> Vec<OrganismIndex> {
        let mut orphans = Vec::new();
        for s in self.species.iter_mut() {
            orphans.extend(s.kill(&mut self.organisms, self.settings.survival_rate));
        }
        orphans
    }

    fn remove_extinct_species(&mut self) -> Vec<OrganismIndex> {
        let mut orphans = Vec::new();
        for s in self.species.iter_mut() {
            if s.should_go_extinct(&self.settings) {
                debug!(target: "neat", "gen: {}; species {} went extinct at age {}", self.generation, s.id.0, s.age);
                orphans.extend(s.go_extinct(&mut self.organisms));
            }
        }
        self.species.retain(|s| !s.is_empty());
        orphans
    }

    /// Species allowed to receive offspring: every non-stagnant one, or the
    /// two with the best champions when all of them stagnate.
    fn breeding_species(&self) -> Vec<usize> {
        let eligible = (0..self.species.len()).filter(|&i| !self.species[i].is_stagnant(&self.settings)).collect_vec();
        if !eligible.is_empty() {
            return eligible;
        }

        debug!(target: "neat", "gen: {}; every species stagnates, only the top two reproduce", self.generation);
        (0..self.species.len())
            .sorted_by(|&a, &b| self.species[b].champion_fitness.total_cmp(&self.species[a].champion_fitness))
            .take(2)
            .collect_vec()
    }

    fn reproduce<R: Rng>(&mut self, rng: &mut R, orphans: Vec<OrganismIndex>) {
        if orphans.is_empty() {
            return;
        }

        if self.species.is_empty() {
            debug!(target: "neat", "gen: {}; no species left, reseeding {} organisms", self.generation, orphans.len());
            for index in orphans {
                let mut genome = match &self.best {
                    Some((best, _)) => best.clone(),
                    None => Genome::init(rng, &mut self.innovation, &self.settings),
                };
                genome.mutate(rng, &mut self.innovation, &self.settings);
                self.organisms[index] = Organism::create_from_genome(genome);
            }
            return;
        }

        let breeders = self.breeding_species();
        let shared = breeders.iter().map(|&i| self.species[i].shared_fitness).collect_vec();
        let dist = WeightedIndex::new(breeding_weights(shared)).ok();

        let mut children = Vec::with_capacity(orphans.len());
        for index in orphans {
            let chosen = match &dist {
                Some(dist) => breeders.get(dist.sample(rng)).copied(),
                None => breeders.choose(rng).copied(),
            };
            let Some(species_index) = chosen else {
                continue;
            };
            if let Some(child) = self.species[species_index].breed(rng, &self.organisms, &mut self.innovation, &self.settings) {
                children.push((index, species_index, child));
            }
        }

        for (index, species_index, child) in children {
            let species = &mut self.species[species_index];
            let mut organism = Organism::create_from_genome(child);
            organism.species = Some(species.id);
            species.members.push(index);
            self.organisms[index] = organism;
        }
    }

    pub fn report(&self) -> GenerationReport {
        GenerationReport {
            generation: self.generation,
            best_fitness: self.best.as_ref().map_or(f64::NEG_INFINITY, |(_, f)| *f),
            species: self.species.iter().map(|s| s.report(&self.settings)).collect(),
        }
    }
}

/// Shared fitnesses as sampling weights, shifted to be positive when any of
/// them is not.
fn breeding_weights(shared: Vec<f64>) -> Vec<f64> {
    let min_shared = shared.iter().copied().fold(f64::INFINITY, f64::min);
    if min_shared > 0. {
        shared
    } else {
        shared.iter().map(|s| s - min_shared + 1e-6).collect_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neat::action::ActionSpace;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn small_settings() -> Settings {
        Settings {
            n_organisms: 30,
            max_generations: 5,
            ..Settings::standard(3, ActionSpace::continuous(1))
        }
    }

    struct SumArena;
    impl SinglePlayerArena for SumArena {
        fn evaluate(&self, genome: &mut Genome) -> f64 {
            genome.evaluate(&[1., 0.5, -0.5])[0]
        }
    }

    struct ConstantSignal(Vec<f64>, usize);
    impl FitnessSignal for ConstantSignal {
        fn fitness(&self, organism: OrganismIndex) -> f64 {
            self.0[organism.0]
        }

        fn reset_fitness(&mut self, _organism: OrganismIndex) {
            self.1 += 1;
        }
    }

    fn assert_partition(population: &Population) {
        let mut seen = FxHashSet::default();
        for s in &population.species {
            for &m in &s.members {
                assert!(seen.insert(m), "organism {:?} is in two species", m);
                assert_eq!(population.organisms[m].species, Some(s.id));
            }
        }
        assert_eq!(seen.len(), population.organisms.len());
    }

    #[test]
    fn test_init() {
        let settings = small_settings();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(31);
        let population = Population::init(&mut rng, settings.clone()).unwrap();
        assert_eq!(population.organisms.len(), settings.n_organisms);
        assert!(!population.species.is_empty());
        assert_partition(&population);
        // 3 inputs + bias into 1 output
        assert_eq!(population.innovation.len(), 4);
    }

    #[test]
    fn init_rejects_bad_settings() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(32);
        let settings = Settings {
            survival_rate: 2.,
            ..small_settings()
        };
        assert!(matches!(Population::init(&mut rng, settings), Err(NeatError::InvalidSettings(_))));
    }

    #[test]
    fn generations_keep_population_size_and_partition() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(33);
        let mut population = Population::init(&mut rng, small_settings()).unwrap();
        for _ in 0..4 {
            population.evaluate_single_player(&SumArena);
            let report = population.next_generation(&mut rng).unwrap();
            assert!(!report.species.is_empty());
            assert_eq!(population.organisms.len(), 30);
            assert!(population.organisms.iter().all(|o| o.species.is_some()));
            assert!(population.organisms.iter().all(|o| o.genome.check_layer_ordering()));
        }
        population.speciate(&mut rng);
        assert_partition(&population);
    }

    #[test]
    fn speciated_members_are_compatible_with_representative() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(34);
        let settings = Settings {
            species_distance_threshold: 0.3,
            ..small_settings()
        };
        let mut population = Population::init(&mut rng, settings).unwrap();
        population.speciate(&mut rng);
        for s in &population.species {
            for &m in &s.members {
                let genome = &population.organisms[m].genome;
                assert!(genome.distance(&s.representative, &population.settings) < population.settings.species_distance_threshold);
            }
        }
        assert_partition(&population);
    }

    #[test]
    fn best_genome_tracks_champion() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(35);
        let mut population = Population::init(&mut rng, small_settings()).unwrap();
        assert!(population.best().is_none());
        population.evaluate_single_player(&SumArena);
        let top = population.organisms.iter().map(|o| o.fitness).fold(f64::NEG_INFINITY, f64::max);
        let report = population.next_generation(&mut rng).unwrap();
        let (_, best) = population.best().unwrap();
        assert_eq!(best, top);
        assert_eq!(report.best_fitness, top);
    }

    #[test]
    fn terminal_after_max_generations() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(36);
        let settings = Settings {
            max_generations: 2,
            ..small_settings()
        };
        let mut population = Population::init(&mut rng, settings).unwrap();
        assert!(population.next_generation(&mut rng).is_some());
        assert_eq!(population.state(), TrainerState::Running);
        assert!(population.next_generation(&mut rng).is_some());
        assert!(population.is_terminal());
        assert!(population.next_generation(&mut rng).is_none());
        assert_eq!(population.generation, 2);
    }

    #[test]
    fn advance_fires_on_horizon_or_all_done() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(37);
        let settings = Settings {
            generation_horizon: 10.,
            ..small_settings()
        };
        let mut population = Population::init(&mut rng, settings).unwrap();
        let mut signal = ConstantSignal((0..30).map(|i| i as f64).collect(), 0);

        assert!(population.advance(&mut rng, 4., &mut signal).is_none());
        assert!(population.advance(&mut rng, 4., &mut signal).is_none());
        let report = population.advance(&mut rng, 4., &mut signal).unwrap();
        assert_eq!(report.generation, 0);
        assert_eq!(report.best_fitness, 29.);
        assert_eq!(signal.1, 30);

        for index in population.organisms.indices().collect_vec() {
            population.mark_done(index);
        }
        assert!(population.all_done());
        assert!(population.advance(&mut rng, 0., &mut signal).is_some());
        assert_eq!(population.generation, 2);
        assert!(!population.all_done());
    }

    #[test]
    fn extinct_species_are_replaced() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(38);
        let settings = Settings {
            extinction_age: 0,
            // every organism founds its own species
            species_distance_threshold: 1e-9,
            ..small_settings()
        };
        let mut population = Population::init(&mut rng, settings).unwrap();
        assert_eq!(population.species.len(), 30);
        population.next_generation(&mut rng);
        population.next_generation(&mut rng);
        assert_eq!(population.organisms.len(), 30);
        assert!(population.organisms.iter().all(|o| o.species.is_some()));
        assert!(population.organisms.iter().all(|o| o.genome.check_layer_ordering()));
    }

    fn one_species_per_organism(stagnation_allowance: usize) -> (Xoshiro256PlusPlus, Population) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(41);
        let settings = Settings {
            n_organisms: 10,
            stagnation_allowance,
            species_distance_threshold: 1e-9,
            ..small_settings()
        };
        let mut population = Population::init(&mut rng, settings).unwrap();
        assert_eq!(population.species.len(), 10);
        for index in population.organisms.indices().collect_vec() {
            population.organisms[index].fitness = index.0 as f64;
        }
        (rng, population)
    }

    #[test]
    fn only_top_two_breed_when_all_stagnate() {
        let (mut rng, mut population) = one_species_per_organism(0);
        // the second pass sees no improvement, so every species stagnates
        population.adjust_fitness();
        population.adjust_fitness();
        assert!(population.species.iter().all(|s| s.is_stagnant(&population.settings)));

        let breeders = population.breeding_species();
        assert_eq!(breeders, vec![9, 8]);
        let allowed = [population.species[9].id, population.species[8].id];

        let orphans = vec![OrganismIndex(0), OrganismIndex(1), OrganismIndex(2)];
        for s in population.species.iter_mut().take(3) {
            s.members.clear();
        }
        for &index in &orphans {
            population.organisms[index].species = None;
        }
        population.reproduce(&mut rng, orphans.clone());
        for index in orphans {
            let species = population.organisms[index].species.unwrap();
            assert!(allowed.contains(&species));
        }
    }

    #[test]
    fn non_stagnant_species_all_breed() {
        let (_, mut population) = one_species_per_organism(15);
        population.adjust_fitness();
        population.adjust_fitness();
        assert_eq!(population.breeding_species(), (0..10).collect_vec());
    }

    #[test]
    fn breeding_weights_are_positive() {
        assert_eq!(breeding_weights(vec![1., 2., 4.]), vec![1., 2., 4.]);

        let shifted = breeding_weights(vec![-3., 0., 2.]);
        assert!(shifted.iter().all(|&w| w > 0.));
        assert!(shifted.windows(2).all(|w| w[0] < w[1]));
        assert_approx_eq::assert_approx_eq!(shifted[2] - shifted[0], 5.);
        assert!(WeightedIndex::new(&shifted).is_ok());

        let constant = breeding_weights(vec![0.; 3]);
        assert!(WeightedIndex::new(&constant).is_ok());
    }

    #[test]
    fn act_dispatches_to_organism() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(39);
        let mut population = Population::init(&mut rng, small_settings()).unwrap();
        let action = population.act(OrganismIndex(0), &[0., 1., 0.]).unwrap();
        assert!(matches!(action, Action::Continuous(ref v) if v.len() == 1));
        assert!(population.act(OrganismIndex(0), &[0.]).is_err());
        assert!(matches!(population.act(OrganismIndex(99), &[0., 0., 0.]), Err(NeatError::UnknownOrganism(99))));
    }

    #[test]
    fn report_display_lists_species() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(40);
        let population = Population::init(&mut rng, small_settings()).unwrap();
        let text = population.report().to_string();
        assert!(text.starts_with("generation 0"));
        assert_eq!(text.lines().count(), 1 + population.species.len());
    }
}
