use itertools::Itertools;
use rand::{seq::{index, SliceRandom}, Rng};
use rand_distr::{Distribution, StandardNormal, Uniform};
use tracing::trace;

use super::action::{softmax, Action, ActionSpace};
use super::activation::Activation;
use super::align::{align_iter, align_map, AlignedPair, FxIndexMap};
use super::error::{NeatError, NeatResult};
use super::gene::{sample_initial_weight, ConnectionGene, NodeGene, NodeId, NodeKind, INPUT_LAYER, OUTPUT_LAYER};
use super::innovation::{InnovationContext, InnovationNumber};
use super::settings::Settings;

/// An evolvable feed-forward graph.
///
/// Nodes are keyed by id and connections by innovation number, both kept in
/// ascending key order so two genomes can be merge-walked gene by gene.
/// Every connection runs from a lower `layer` to a strictly higher one, which
/// is what keeps the graph acyclic and lets evaluation run layer by layer.
#[derive(Debug, Clone)]
pub struct Genome {
    nodes: FxIndexMap<NodeId, NodeGene>,
    connections: FxIndexMap<InnovationNumber, ConnectionGene>,
    layers: Vec<f64>,
    input_ids: Vec<NodeId>,
    output_ids: Vec<NodeId>,
    bias_id: NodeId,
    action_space: ActionSpace,
    activation_order: Vec<NodeId>,
}

impl Genome {
    /// Inputs, bias and outputs with no connections. Ids run inputs first,
    /// then the bias, then the outputs.
    pub fn minimal(n_sensor_nodes: usize, action_space: ActionSpace, output_activation: Activation) -> Genome {
        let n_output_nodes = action_space.n_outputs();
        let mut nodes = FxIndexMap::default();
        let mut input_ids = Vec::with_capacity(n_sensor_nodes);
        let mut output_ids = Vec::with_capacity(n_output_nodes);

        let mut node_id = NodeId(0);
        for _ in 0..n_sensor_nodes {
            nodes.insert(node_id, NodeGene::input(node_id));
            input_ids.push(node_id);
            node_id = node_id.inc();
        }

        let bias_id = node_id;
        nodes.insert(bias_id, NodeGene::bias(bias_id));
        node_id = node_id.inc();

        for _ in 0..n_output_nodes {
            nodes.insert(node_id, NodeGene::output(node_id, output_activation));
            output_ids.push(node_id);
            node_id = node_id.inc();
        }

        let mut genome = Genome {
            nodes,
            connections: FxIndexMap::default(),
            layers: vec![INPUT_LAYER, OUTPUT_LAYER],
            input_ids,
            output_ids,
            bias_id,
            action_space,
            activation_order: Vec::new(),
        };
        genome.rebuild();
        genome
    }

    /// Seed genome for a session. When `initial_fully_connected` is set every
    /// input and the bias get an edge to every output.
    pub fn init<R: Rng>(rng: &mut R, ctx: &mut InnovationContext, settings: &Settings) -> Genome {
        let mut genome = Genome::minimal(settings.n_sensor_nodes, settings.action_space.clone(), settings.output_activation);
        ctx.reserve_node_ids(genome.next_node_id());

        if settings.initial_fully_connected {
            let sources = genome.input_ids.iter().copied().chain(std::iter::once(genome.bias_id)).collect_vec();
            let targets = genome.output_ids.clone();
            for &in_node_id in &sources {
                for &out_node_id in &targets {
                    let weight = sample_initial_weight(rng);
                    genome.add_connection(ctx, in_node_id, out_node_id, weight);
                }
            }
        }
        genome
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeGene> {
        self.nodes.values()
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionGene> {
        self.connections.values()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeGene> {
        self.nodes.get(&id)
    }

    pub fn connection(&self, innovation: InnovationNumber) -> Option<&ConnectionGene> {
        self.connections.get(&innovation)
    }

    pub fn connection_mut(&mut self, innovation: InnovationNumber) -> Option<&mut ConnectionGene> {
        self.connections.get_mut(&innovation)
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn n_enabled_connections(&self) -> usize {
        self.connections.values().filter(|c| c.enabled).count()
    }

    pub fn layers(&self) -> &[f64] {
        &self.layers
    }

    pub fn input_ids(&self) -> &[NodeId] {
        &self.input_ids
    }

    pub fn output_ids(&self) -> &[NodeId] {
        &self.output_ids
    }

    pub fn bias_id(&self) -> NodeId {
        self.bias_id
    }

    pub fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    pub fn hidden_node_ids(&self) -> Vec<NodeId> {
        self.nodes.values().filter(|n| n.kind == NodeKind::Hidden).map(|n| n.id).collect()
    }

    pub fn innovation_numbers(&self) -> impl Iterator<Item = InnovationNumber> + '_ {
        self.connections.keys().copied()
    }

    pub fn next_node_id(&self) -> NodeId {
        self.nodes.keys().max().map_or(NodeId(0), |id| id.inc())
    }

    fn insert_node(&mut self, node: NodeGene) {
        let needs_sort = self.nodes.last().map_or(false, |(&last, _)| last > node.id);
        self.nodes.insert(node.id, node);
        if needs_sort {
            self.nodes.sort_keys();
        }
    }

    fn insert_connection(&mut self, conn: ConnectionGene) {
        let needs_sort = self.connections.last().map_or(false, |(&last, _)| last > conn.innovation);
        self.connections.insert(conn.innovation, conn);
        if needs_sort {
            self.connections.sort_keys();
        }
    }

    fn insert_layer(&mut self, layer: f64) {
        if let Err(pos) = self.layers.binary_search_by(|l| l.total_cmp(&layer)) {
            self.layers.insert(pos, layer);
        }
    }

    /// Recomputes every derived structure from the node and connection maps:
    /// incoming back-references, the layer set and the evaluation order.
    pub fn rebuild(&mut self) {
        for node in self.nodes.values_mut() {
            node.incoming.clear();
        }
        for conn in self.connections.values() {
            if let Some(target) = self.nodes.get_mut(&conn.out_node_id) {
                target.incoming.push(conn.innovation);
            }
        }

        self.layers = self
            .nodes
            .values()
            .map(|n| n.layer)
            .chain([INPUT_LAYER, OUTPUT_LAYER])
            .sorted_by(|a, b| a.total_cmp(b))
            .dedup()
            .collect();

        self.activation_order.clear();
        for &layer in &self.layers {
            if layer <= INPUT_LAYER {
                continue;
            }
            self.activation_order.extend(self.nodes.values().filter(|n| n.layer == layer).map(|n| n.id));
        }
    }

    /// True when every connection runs between existing nodes from a lower
    /// layer to a strictly higher one.
    pub fn check_layer_ordering(&self) -> bool {
        self.connections.values().all(|conn| match (self.nodes.get(&conn.in_node_id), self.nodes.get(&conn.out_node_id)) {
            (Some(src), Some(tgt)) => src.layer < tgt.layer,
            _ => false,
        })
    }

    pub fn has_connection(&self, in_node_id: NodeId, out_node_id: NodeId) -> bool {
        self.nodes.get(&out_node_id).map_or(false, |target| {
            target
                .incoming
                .iter()
                .any(|i| self.connections.get(i).map_or(false, |c| c.in_node_id == in_node_id))
        })
    }

    /// Adds an enabled edge. Returns `None` without touching the genome when an
    /// endpoint is missing, the edge would not climb in layer, or it already exists.
    pub fn add_connection(&mut self, ctx: &mut InnovationContext, in_node_id: NodeId, out_node_id: NodeId, weight: f64) -> Option<InnovationNumber> {
        let in_layer = self.nodes.get(&in_node_id)?.layer;
        let out_layer = self.nodes.get(&out_node_id)?.layer;
        if in_layer >= out_layer || self.has_connection(in_node_id, out_node_id) {
            return None;
        }

        let innovation = ctx.get_or_assign(in_node_id, out_node_id);
        if self.connections.contains_key(&innovation) {
            return None;
        }
        self.insert_connection(ConnectionGene::create(innovation, in_node_id, out_node_id, weight));
        if let Some(target) = self.nodes.get_mut(&out_node_id) {
            target.incoming.push(innovation);
        }
        Some(innovation)
    }

    /// Splits connection `innovation` with a new hidden node halfway between
    /// its endpoints' layers. The old edge is disabled but kept. The incoming
    /// half gets weight 1 and the outgoing half inherits the old weight.
    pub fn add_node(&mut self, ctx: &mut InnovationContext, innovation: InnovationNumber, activation: Activation) -> Option<NodeId> {
        let conn = self.connections.get(&innovation)?.clone();
        if !conn.enabled {
            return None;
        }
        let in_layer = self.nodes.get(&conn.in_node_id)?.layer;
        let out_layer = self.nodes.get(&conn.out_node_id)?.layer;
        let layer = (in_layer + out_layer) / 2.;
        if !(in_layer < layer && layer < out_layer) {
            // no representable layer left between the endpoints
            return None;
        }

        ctx.reserve_node_ids(self.next_node_id());
        let mut new_node_id = ctx.split_node_id(innovation);
        if self.nodes.contains_key(&new_node_id) {
            new_node_id = ctx.fresh_node_id();
        }

        if let Some(old) = self.connections.get_mut(&innovation) {
            old.enabled = false;
        }
        self.insert_layer(layer);
        self.insert_node(NodeGene::hidden(new_node_id, layer, activation));

        let in_innovation = ctx.get_or_assign(conn.in_node_id, new_node_id);
        let out_innovation = ctx.get_or_assign(new_node_id, conn.out_node_id);
        self.insert_connection(ConnectionGene::create(in_innovation, conn.in_node_id, new_node_id, 1.));
        self.insert_connection(ConnectionGene::create(out_innovation, new_node_id, conn.out_node_id, conn.weight));
        self.rebuild();

        trace!(target: "neat", "split connection {:?} with node {:?} at layer {}", innovation, new_node_id, layer);
        Some(new_node_id)
    }

    /// Forward pass. Inputs go to the input nodes in order, then every
    /// non-input layer is computed in ascending order.
    ///
    /// Unchecked: extra inputs are ignored and missing ones read as 0.
    /// [`Genome::act`] and friends reject a wrong length instead.
    pub fn evaluate(&mut self, inputs: &[f64]) -> Vec<f64> {
        for (i, id) in self.input_ids.iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.out_value = inputs.get(i).copied().unwrap_or(0.);
            }
        }

        for i in 0..self.activation_order.len() {
            let id = self.activation_order[i];
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let active_sum = node.incoming.iter().fold(0., |acc, innovation| match self.connections.get(innovation) {
                Some(conn) if conn.enabled => {
                    let source_value = self.nodes.get(&conn.in_node_id).map_or(0., |src| src.out_value);
                    acc + source_value * conn.weight
                }
                _ => acc,
            });

            if let Some(node) = self.nodes.get_mut(&id) {
                node.in_value = active_sum;
                node.out_value = node.activation.apply(active_sum);
            }
        }

        self.output_ids
            .iter()
            .map(|id| self.nodes.get(id).map_or(0., |n| n.out_value))
            .collect()
    }

    fn checked_evaluate(&mut self, inputs: &[f64]) -> NeatResult<Vec<f64>> {
        if inputs.len() != self.input_ids.len() {
            return Err(NeatError::InputLengthMismatch {
                expected: self.input_ids.len(),
                actual: inputs.len(),
            });
        }
        Ok(self.evaluate(inputs))
    }

    /// Evaluates and decodes according to the genome's own action space.
    pub fn act(&mut self, inputs: &[f64]) -> NeatResult<Action> {
        let raw = self.checked_evaluate(inputs)?;
        self.action_space.decode(&raw)
    }

    pub fn act_continuous(&mut self, inputs: &[f64]) -> NeatResult<Vec<f64>> {
        let raw = self.checked_evaluate(inputs)?;
        self.action_space.decode_continuous(&raw)
    }

    pub fn act_discrete(&mut self, inputs: &[f64]) -> NeatResult<Vec<usize>> {
        let raw = self.checked_evaluate(inputs)?;
        self.action_space.decode_discrete(&raw)
    }

    pub fn clear_values(&mut self) {
        for node in self.nodes.values_mut() {
            node.clear_values();
        }
    }

    pub fn mutate<R: Rng>(&mut self, rng: &mut R, ctx: &mut InnovationContext, settings: &Settings) {
        if self.connections.is_empty() {
            self.mutate_add_connection(rng, ctx, settings);
        }

        let between = Uniform::from(0.0..1.0);
        if between.sample(rng) < settings.mutate_connections_rate {
            self.mutate_connections(rng, settings);
        }
        if between.sample(rng) < settings.mutate_node_rate {
            self.mutate_node(rng, settings);
        }
        if between.sample(rng) < settings.mutate_add_connection_rate {
            self.mutate_add_connection(rng, ctx, settings);
        }
        if between.sample(rng) < settings.mutate_add_node_rate {
            self.mutate_add_node(rng, ctx, settings);
        }
    }

    /// Tries up to `add_connection_attempts` random node pairs and links the
    /// first legal one. Returns whether a connection was added.
    pub fn mutate_add_connection<R: Rng>(&mut self, rng: &mut R, ctx: &mut InnovationContext, settings: &Settings) -> bool {
        if self.connections.len() >= settings.max_connections || self.nodes.len() < 2 {
            return false;
        }

        let node_ids = self.nodes.keys().copied().collect_vec();
        for _ in 0..settings.add_connection_attempts {
            let pair = index::sample(rng, node_ids.len(), 2);
            let (a, b) = (node_ids[pair.index(0)], node_ids[pair.index(1)]);
            let (layer_a, layer_b) = match (self.nodes.get(&a), self.nodes.get(&b)) {
                (Some(na), Some(nb)) => (na.layer, nb.layer),
                _ => continue,
            };
            if layer_a == layer_b {
                continue;
            }

            let (in_node_id, out_node_id) = if layer_a < layer_b { (a, b) } else { (b, a) };
            if self.has_connection(in_node_id, out_node_id) {
                continue;
            }

            let weight = sample_initial_weight(rng);
            if let Some(innovation) = self.add_connection(ctx, in_node_id, out_node_id, weight) {
                trace!(target: "neat", "added connection {:?}: {:?} -> {:?}", innovation, in_node_id, out_node_id);
                return true;
            }
        }
        false
    }

    /// Splits a random enabled connection. Returns whether a node was added.
    pub fn mutate_add_node<R: Rng>(&mut self, rng: &mut R, ctx: &mut InnovationContext, settings: &Settings) -> bool {
        if self.nodes.len() >= settings.max_nodes || self.connections.len() + 2 > settings.max_connections {
            return false;
        }

        let enabled = self.connections.values().filter(|c| c.enabled).map(|c| c.innovation).collect_vec();
        let Some(&innovation) = enabled.choose(rng) else {
            return false;
        };
        let activation = Activation::random(rng, &settings.hidden_activations);
        self.add_node(ctx, innovation, activation).is_some()
    }

    /// Per connection: toggle with `toggle_connection_rate`, otherwise replace
    /// the weight with `replace_weight_rate`, otherwise nudge it.
    pub fn mutate_connections<R: Rng>(&mut self, rng: &mut R, settings: &Settings) {
        let between = Uniform::from(0.0..1.0);
        for conn in self.connections.values_mut() {
            if between.sample(rng) < settings.toggle_connection_rate {
                conn.enabled = !conn.enabled;
            } else if between.sample(rng) < settings.replace_weight_rate {
                conn.weight = sample_initial_weight(rng);
            } else {
                let z: f64 = rng.sample(StandardNormal);
                conn.weight += settings.mutate_weight_scale * z;
            }
        }
    }

    /// Re-rolls the activation of one random hidden node.
    pub fn mutate_node<R: Rng>(&mut self, rng: &mut R, settings: &Settings) -> bool {
        let hidden = self.hidden_node_ids();
        let Some(id) = hidden.choose(rng) else {
            return false;
        };
        let activation = Activation::random(rng, &settings.hidden_activations);
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.activation = activation;
                true
            }
            None => false,
        }
    }

    /// Compatibility distance `c1·E/N + c2·D/N + c3·W̄` over connection genes.
    pub fn distance(&self, other: &Genome, settings: &Settings) -> f64 {
        #[derive(PartialEq)]
        enum ExcessSide {
            Left,
            Right,
            Neither,
        }

        let mut total_weight_diff = 0.;
        let mut n_matching = 0;
        let mut excess_side = ExcessSide::Neither;
        let mut excess_count = 0;
        let mut disjoint_count = 0;

        align_iter(&self.connections, &other.connections, |pair| match pair {
            AlignedPair::HasBoth((_, left), (_, right)) => {
                n_matching += 1;
                excess_side = ExcessSide::Neither;
                disjoint_count += excess_count;
                excess_count = 0;
                total_weight_diff += (left.weight - right.weight).abs();
            }
            AlignedPair::HasLeft(_) => {
                if excess_side == ExcessSide::Left {
                    excess_count += 1;
                } else {
                    excess_side = ExcessSide::Left;
                    disjoint_count += excess_count;
                    excess_count = 1;
                }
            }
            AlignedPair::HasRight(_) => {
                if excess_side == ExcessSide::Right {
                    excess_count += 1;
                } else {
                    excess_side = ExcessSide::Right;
                    disjoint_count += excess_count;
                    excess_count = 1;
                }
            }
        });

        let larger = std::cmp::max(self.connections.len(), other.connections.len());
        let n = if larger < settings.distance_normalisation_threshold { 1. } else { larger as f64 };
        let mean_weight_diff = if n_matching > 0 { total_weight_diff / n_matching as f64 } else { 0. };

        settings.excess_coefficient * (excess_count as f64) / n
            + settings.disjoint_coefficient * (disjoint_count as f64) / n
            + settings.weight_coefficient * mean_weight_diff
    }
}

/// Builds a child from two parents. Genes both parents carry come from one of
/// them at random, biased towards the fitter by `exp(fitness)`. Genes only one
/// parent carries are always inherited.
pub fn cross_over<R: Rng>(rng: &mut R, genome_1: &Genome, fitness_1: f64, genome_2: &Genome, fitness_2: f64) -> Genome {
    debug_assert_eq!(genome_1.action_space, genome_2.action_space, "Tried to cross genomes with different action spaces");

    let p_left = softmax(&[fitness_1, fitness_2])[0];
    let between = Uniform::from(0.0..1.0);

    let nodes = align_map(&genome_1.nodes, &genome_2.nodes, |pair| {
        let (k, v) = match pair {
            AlignedPair::HasBoth(left, right) => {
                if between.sample(rng) < p_left {
                    left
                } else {
                    right
                }
            }
            AlignedPair::HasLeft(gene) | AlignedPair::HasRight(gene) => gene,
        };
        Some((*k, v.clone()))
    });

    let connections = align_map(&genome_1.connections, &genome_2.connections, |pair| {
        let (k, v) = match pair {
            AlignedPair::HasBoth(left, right) => {
                if between.sample(rng) < p_left {
                    left
                } else {
                    right
                }
            }
            AlignedPair::HasLeft(gene) | AlignedPair::HasRight(gene) => gene,
        };
        Some((*k, v.clone()))
    });

    let mut child = Genome {
        nodes,
        connections,
        layers: Vec::new(),
        input_ids: genome_1.input_ids.clone(),
        output_ids: genome_1.output_ids.clone(),
        bias_id: genome_1.bias_id,
        action_space: genome_1.action_space.clone(),
        activation_order: Vec::new(),
    };
    child.clear_values();
    child.rebuild();
    child
}
