use serde::{Deserialize, Serialize};

use super::action::ActionSpace;
use super::activation::Activation;
use super::error::{NeatError, NeatResult};

/// Hyperparameters for one training session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub n_sensor_nodes: usize,
    pub action_space: ActionSpace,
    pub n_organisms: usize,
    pub max_generations: usize,
    /// Time or step budget of one generation when driven by [`Population::advance`](super::population::Population::advance).
    pub generation_horizon: f64,
    pub initial_fully_connected: bool,

    pub survival_rate: f64,
    pub stagnation_allowance: usize,
    /// Species this old with fewer than two members are pruned.
    pub extinction_age: usize,

    pub excess_coefficient: f64,
    pub disjoint_coefficient: f64,
    pub weight_coefficient: f64,
    pub species_distance_threshold: f64,
    /// Genomes smaller than this are compared without size normalisation.
    pub distance_normalisation_threshold: usize,

    pub mutate_add_connection_rate: f64,
    pub mutate_add_node_rate: f64,
    pub mutate_connections_rate: f64,
    pub mutate_node_rate: f64,
    pub toggle_connection_rate: f64,
    pub replace_weight_rate: f64,
    pub mutate_weight_scale: f64,
    pub add_connection_attempts: usize,
    /// Caps checked by the add-node and add-connection mutations only.
    /// Crossover keeps the union of both parents and can exceed them.
    pub max_nodes: usize,
    pub max_connections: usize,

    pub hidden_activations: Vec<Activation>,
    pub output_activation: Activation,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::standard(1, ActionSpace::continuous(1))
    }
}

impl Settings {
    pub fn standard(n_sensor_nodes: usize, action_space: ActionSpace) -> Settings {
        Settings {
            n_sensor_nodes,
            action_space,
            n_organisms: 150,
            max_generations: 100,
            generation_horizon: 1000.,
            initial_fully_connected: true,
            survival_rate: 0.5,
            stagnation_allowance: 15,
            extinction_age: 3,
            excess_coefficient: 1.0,
            disjoint_coefficient: 1.0,
            weight_coefficient: 0.4,
            species_distance_threshold: 3.0,
            distance_normalisation_threshold: 20,
            mutate_add_connection_rate: 0.1,
            mutate_add_node_rate: 0.05,
            mutate_connections_rate: 0.8,
            mutate_node_rate: 0.05,
            toggle_connection_rate: 0.01,
            replace_weight_rate: 0.1,
            mutate_weight_scale: 0.1,
            add_connection_attempts: 20,
            max_nodes: 256,
            max_connections: 1024,
            hidden_activations: Activation::ALL.to_vec(),
            output_activation: Activation::Identity,
        }
    }

    /// Reads a (possibly partial) JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> NeatResult<Settings> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn n_output_nodes(&self) -> usize {
        self.action_space.n_outputs()
    }

    pub fn validate(&self) -> NeatResult<()> {
        fn probability(name: &str, value: f64) -> NeatResult<()> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(NeatError::InvalidSettings(format!("{} must be within [0, 1], got {}", name, value)))
            }
        }

        self.action_space.validate()?;
        if self.n_sensor_nodes == 0 {
            return Err(NeatError::InvalidSettings("n_sensor_nodes must be positive".into()));
        }
        if self.n_organisms < 2 {
            return Err(NeatError::InvalidSettings(format!("n_organisms must be at least 2, got {}", self.n_organisms)));
        }
        if !(self.survival_rate > 0.0 && self.survival_rate <= 1.0) {
            return Err(NeatError::InvalidSettings(format!("survival_rate must be within (0, 1], got {}", self.survival_rate)));
        }
        probability("mutate_add_connection_rate", self.mutate_add_connection_rate)?;
        probability("mutate_add_node_rate", self.mutate_add_node_rate)?;
        probability("mutate_connections_rate", self.mutate_connections_rate)?;
        probability("mutate_node_rate", self.mutate_node_rate)?;
        probability("toggle_connection_rate", self.toggle_connection_rate)?;
        probability("replace_weight_rate", self.replace_weight_rate)?;
        if !(self.mutate_weight_scale.is_finite() && self.mutate_weight_scale >= 0.0) {
            return Err(NeatError::InvalidSettings(format!("mutate_weight_scale must be finite and non-negative, got {}", self.mutate_weight_scale)));
        }
        if !(self.species_distance_threshold > 0.0) {
            return Err(NeatError::InvalidSettings(format!("species_distance_threshold must be positive, got {}", self.species_distance_threshold)));
        }
        let min_nodes = self.n_sensor_nodes + 1 + self.n_output_nodes();
        if self.max_nodes < min_nodes {
            return Err(NeatError::InvalidSettings(format!("max_nodes ({}) is below the {} fixed nodes", self.max_nodes, min_nodes)));
        }
        Ok(())
    }
}
