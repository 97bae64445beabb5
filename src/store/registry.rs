use super::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    // Columnar Arrays
    pub kinds: Vec<NodeKind>,
    pub meta: Vec<NodeMetadata>,

    // Topology (CSR-ish + Adjacency)
    pub parents_flat: Vec<NodeId>,
    pub parents_ranges: Vec<(u32, u32)>, // (start, count)

    // Downstream traversal helpers
    pub first_child: Vec<u32>,
    pub child_targets: Vec<NodeId>,
    pub next_child: Vec<u32>,

    // Key lookup (not serialized, rebuilt on load)
    #[serde(skip)]
    index: HashMap<NodeKey, NodeId>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.kinds.len() }

    /// Rebuilds the key index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self.meta.iter().enumerate().map(|(i, m)| (m.key.clone(), NodeId::new(i))).collect();
    }

    /// Allocates a node without edges. Returns `None` if the key is taken.
    ///
    /// Nodes are allocated first and wired afterwards with `set_parents`, so
    /// references may point forward (or form cycles, which the builder then
    /// reports).
    pub fn add_node(&mut self, meta: NodeMetadata) -> Option<NodeId> {
        if self.index.contains_key(&meta.key) {
            return None;
        }
        let id = NodeId::new(self.kinds.len());
        self.index.insert(meta.key.clone(), id);
        self.kinds.push(meta.key.kind);
        self.meta.push(meta);
        self.first_child.push(u32::MAX);
        Some(id)
    }

    /// Registers the parents of `id`. Must be called once per node, in id order.
    pub fn set_parents(&mut self, id: NodeId, parents: &[NodeId]) {
        debug_assert_eq!(self.parents_ranges.len(), id.index(), "parents must be set in id order");

        // 1. Register Parents
        let start = self.parents_flat.len() as u32;
        self.parents_flat.extend_from_slice(parents);
        self.parents_ranges.push((start, parents.len() as u32));

        // 2. Register Children (Adjacency list for downstream lookups)
        for &parent in parents {
            let p_idx = parent.index();
            let head = self.first_child[p_idx];
            let new_edge = self.child_targets.len() as u32;
            self.child_targets.push(id);
            self.next_child.push(head);
            self.first_child[p_idx] = new_edge;
        }
    }

    pub fn lookup(&self, key: &NodeKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    #[inline(always)]
    pub fn get_parents(&self, id: NodeId) -> &[NodeId] {
        match self.parents_ranges.get(id.index()) {
            Some(&(start, count)) => &self.parents_flat[start as usize..(start + count) as usize],
            None => &[],
        }
    }

    /// Consumers of `id`, most recently linked first. A consumer appears once
    /// per edge.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children { registry: self, edge: self.first_child[id.index()] }
    }
}

pub struct Children<'a> {
    registry: &'a Registry,
    edge: u32,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.edge == u32::MAX {
            return None;
        }
        let idx = self.edge as usize;
        self.edge = self.registry.next_child[idx];
        Some(self.registry.child_targets[idx])
    }
}
