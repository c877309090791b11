//! Validity graph: node arena plus version stacks, owned per evaluation batch.

mod node;
mod versions;

use std::collections::BTreeSet;

pub use node::{GraphNode, NodeArena, NodeIndex, NodeKey};
pub use versions::VersionIndex;

use crate::coords::Coordinate;

#[derive(Debug, Default)]
pub struct ValidityGraph {
    arena: NodeArena,
    versions: VersionIndex,
}

impl ValidityGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_node(&mut self, key: NodeKey) -> NodeIndex {
        self.arena.acquire(key)
    }

    #[must_use]
    pub fn find_node(&self, key: NodeKey) -> Option<NodeIndex> {
        self.arena.find(key)
    }

    #[must_use]
    pub fn node_key(&self, index: NodeIndex) -> NodeKey {
        self.arena.node(index).key()
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> &GraphNode {
        self.arena.node(index)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    pub fn add_dependency(&mut self, node: NodeIndex, dependency: NodeIndex) {
        self.arena.add_dependency(node, dependency);
    }

    pub fn add_repealer(&mut self, node: NodeIndex, repealer: NodeIndex) {
        self.arena.add_repealer(node, repealer);
    }

    #[must_use]
    pub fn is_node_valid(&self, node: NodeIndex) -> bool {
        self.arena.is_valid(node)
    }

    pub fn register_version(&mut self, coordinate: Coordinate, node: NodeIndex) {
        self.versions.register_version(coordinate, node);
    }

    pub fn register_base_version(&mut self, coordinate: Coordinate, node: NodeIndex) {
        self.versions.register_first_version(coordinate, node);
    }

    #[must_use]
    pub fn active_version(&self, coordinate: &Coordinate) -> Option<NodeIndex> {
        self.versions.current_active_version(coordinate, &self.arena)
    }

    #[must_use]
    pub fn latest_version(&self, coordinate: &Coordinate) -> Option<NodeIndex> {
        self.versions.latest_registered(coordinate)
    }

    #[must_use]
    pub fn has_version(&self, coordinate: &Coordinate) -> bool {
        self.versions.has_version(coordinate)
    }

    #[must_use]
    pub fn versions(&self, coordinate: &Coordinate) -> &[NodeIndex] {
        self.versions.versions(coordinate)
    }

    /// Active version at `coordinate`, or the last registered one when none is valid.
    #[must_use]
    pub fn resolve_current_node(&self, coordinate: &Coordinate) -> Option<NodeIndex> {
        self.active_version(coordinate).or_else(|| self.latest_version(coordinate))
    }

    #[must_use]
    pub fn valid_node_keys(&self) -> BTreeSet<NodeKey> {
        self.arena
            .indices()
            .filter(|index| self.arena.is_valid(*index))
            .map(|index| self.arena.node(index).key())
            .collect()
    }

    #[must_use]
    pub fn repealer_of(&self, node: NodeIndex) -> Option<NodeKey> {
        self.arena.repealer_of(node).map(|repealer| self.arena.node(repealer).key())
    }
}
