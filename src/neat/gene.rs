use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use super::innovation::InnovationNumber;

#[derive(Debug, Default, PartialEq, PartialOrd, Ord, Clone, Copy, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn inc(self) -> NodeId {
        NodeId(self.0 + 1)
    }
}

/// Registry key of a structural edge.
#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Serialize, Deserialize)]
pub struct GeneKey {
    pub in_node_id: NodeId,
    pub out_node_id: NodeId,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum NodeKind {
    Input,
    Bias,
    Hidden,
    Output,
}

pub const INPUT_LAYER: f64 = 0.0;
pub const OUTPUT_LAYER: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGene {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Topological-order key, not an index. Inputs and bias sit at 0, outputs at 1.
    pub layer: f64,
    pub activation: Activation,
    #[serde(skip)]
    pub in_value: f64,
    #[serde(skip)]
    pub out_value: f64,
    /// Back-references to the connections targeting this node. Rebuilt by the genome.
    #[serde(skip)]
    pub incoming: Vec<InnovationNumber>,
}

impl NodeGene {
    fn create(id: NodeId, kind: NodeKind, layer: f64, activation: Activation) -> NodeGene {
        NodeGene {
            id,
            kind,
            layer,
            activation,
            in_value: 0.,
            out_value: 0.,
            incoming: Vec::new(),
        }
    }

    pub fn input(id: NodeId) -> NodeGene {
        NodeGene::create(id, NodeKind::Input, INPUT_LAYER, Activation::Identity)
    }

    pub fn bias(id: NodeId) -> NodeGene {
        let mut node = NodeGene::create(id, NodeKind::Bias, INPUT_LAYER, Activation::Identity);
        node.out_value = 1.;
        node
    }

    pub fn output(id: NodeId, activation: Activation) -> NodeGene {
        NodeGene::create(id, NodeKind::Output, OUTPUT_LAYER, activation)
    }

    pub fn hidden(id: NodeId, layer: f64, activation: Activation) -> NodeGene {
        NodeGene::create(id, NodeKind::Hidden, layer, activation)
    }

    /// Bias output is pinned to 1, everything else goes back to 0.
    pub fn clear_values(&mut self) {
        self.in_value = 0.;
        self.out_value = if self.kind == NodeKind::Bias { 1. } else { 0. };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionGene {
    pub innovation: InnovationNumber,
    pub in_node_id: NodeId,
    pub out_node_id: NodeId,
    pub weight: f64,
    pub enabled: bool,
}

impl ConnectionGene {
    pub fn create(innovation: InnovationNumber, in_node_id: NodeId, out_node_id: NodeId, weight: f64) -> ConnectionGene {
        ConnectionGene {
            innovation,
            in_node_id,
            out_node_id,
            weight,
            enabled: true,
        }
    }

    pub fn key(&self) -> GeneKey {
        GeneKey {
            in_node_id: self.in_node_id,
            out_node_id: self.out_node_id,
        }
    }
}

const INITIAL_WEIGHT_SCALE: f64 = 0.1;

/// Draws from N(0, 0.1) or N(1, 0.1) with equal odds, so new links start
/// either close to off or close to identity.
pub fn sample_initial_weight<R: Rng>(rng: &mut R) -> f64 {
    let mean = if rng.gen_bool(0.5) { 0. } else { 1. };
    let z: f64 = rng.sample(StandardNormal);
    mean + INITIAL_WEIGHT_SCALE * z
}
