use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::gene::{GeneKey, NodeId};
use super::genome::Genome;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InnovationNumber(pub usize);

impl InnovationNumber {
    fn inc(mut self) -> InnovationNumber {
        self.0 += 1;
        self
    }
}

/// Session-wide table giving every structural mutation a stable identity.
///
/// Edges are keyed by their endpoints, so two genomes that independently grow
/// the same edge get the same innovation number and line up during crossover.
/// Hidden nodes born from splitting a connection are keyed by that connection's
/// innovation for the same reason. The table never shrinks.
#[derive(Debug, Clone, Default)]
pub struct InnovationContext {
    last_innovation_number: InnovationNumber,
    innovation_map: FxHashMap<GeneKey, InnovationNumber>,
    next_node_id: NodeId,
    split_map: FxHashMap<InnovationNumber, NodeId>,
}

impl InnovationContext {
    pub fn new() -> InnovationContext {
        InnovationContext::default()
    }

    /// Registers every connection of `genome` under its existing innovation
    /// number and reserves all of its node ids.
    pub fn from_genome(genome: &Genome) -> InnovationContext {
        let mut res = InnovationContext::new();
        for conn in genome.connections() {
            res.innovation_map.insert(conn.key(), conn.innovation);
            if conn.innovation > res.last_innovation_number {
                res.last_innovation_number = conn.innovation;
            }
        }
        res.reserve_node_ids(genome.next_node_id());
        res
    }

    /// Same key, same number, for the whole session. New keys take `last + 1`.
    pub fn get_innovation_number(&mut self, gene_key: GeneKey) -> InnovationNumber {
        if let Some(&i) = self.innovation_map.get(&gene_key) {
            return i;
        }
        self.last_innovation_number = self.last_innovation_number.inc();
        self.innovation_map.insert(gene_key, self.last_innovation_number);
        self.last_innovation_number
    }

    pub fn get_or_assign(&mut self, in_node_id: NodeId, out_node_id: NodeId) -> InnovationNumber {
        self.get_innovation_number(GeneKey { in_node_id, out_node_id })
    }

    /// Node id for the hidden node created by splitting `split`.
    pub fn split_node_id(&mut self, split: InnovationNumber) -> NodeId {
        if let Some(&id) = self.split_map.get(&split) {
            return id;
        }
        let id = self.fresh_node_id();
        self.split_map.insert(split, id);
        id
    }

    /// A node id nobody has used yet in this session.
    pub fn fresh_node_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id = self.next_node_id.inc();
        id
    }

    /// Ensures ids below `next` are never handed out.
    pub fn reserve_node_ids(&mut self, next: NodeId) {
        if next > self.next_node_id {
            self.next_node_id = next;
        }
    }

    pub fn len(&self) -> usize {
        self.innovation_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.innovation_map.is_empty()
    }

    pub fn last_innovation_number(&self) -> InnovationNumber {
        self.last_innovation_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_assigns_sequential_numbers() {
        let mut ctx = InnovationContext::new();
        assert!(ctx.is_empty());
        assert_eq!(ctx.get_or_assign(NodeId(3), NodeId(7)), InnovationNumber(1));
        assert_eq!(ctx.get_or_assign(NodeId(3), NodeId(7)), InnovationNumber(1));
        assert_eq!(ctx.get_or_assign(NodeId(7), NodeId(9)), InnovationNumber(2));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn registry_direction_matters() {
        let mut ctx = InnovationContext::new();
        let a = ctx.get_or_assign(NodeId(1), NodeId(2));
        let b = ctx.get_or_assign(NodeId(2), NodeId(1));
        assert_ne!(a, b);
    }

    #[test]
    fn split_node_ids_are_stable() {
        let mut ctx = InnovationContext::new();
        ctx.reserve_node_ids(NodeId(5));
        let a = ctx.split_node_id(InnovationNumber(3));
        let b = ctx.split_node_id(InnovationNumber(3));
        let c = ctx.split_node_id(InnovationNumber(4));
        assert_eq!(a, NodeId(5));
        assert_eq!(a, b);
        assert_eq!(c, NodeId(6));
        assert_eq!(ctx.fresh_node_id(), NodeId(7));
    }

    #[test]
    fn reserve_never_moves_backwards() {
        let mut ctx = InnovationContext::new();
        ctx.reserve_node_ids(NodeId(10));
        ctx.reserve_node_ids(NodeId(4));
        assert_eq!(ctx.fresh_node_id(), NodeId(10));
    }
}
