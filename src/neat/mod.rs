pub mod action;
pub mod activation;
pub mod align;
pub mod error;
pub mod gene;
pub mod genome;
pub mod innovation;
pub mod organism;
pub mod population;
pub mod settings;
pub mod species;

pub use action::{Action, ActionSpace, ActionSpaceKind};
pub use activation::Activation;
pub use error::{NeatError, NeatResult};
pub use genome::{cross_over, Genome};
pub use innovation::{InnovationContext, InnovationNumber};
pub use organism::{Organism, OrganismIndex, Organisms};
pub use population::{FitnessSignal, GenerationReport, Population, SinglePlayerArena, TrainerState};
pub use settings::Settings;
pub use species::{Species, SpeciesId, SpeciesReport};
