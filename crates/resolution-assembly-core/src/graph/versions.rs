use std::collections::BTreeMap;

use crate::coords::Coordinate;

use super::node::{NodeArena, NodeIndex};

/// Per-coordinate stack of nodes: the authored baseline first, then every edit registered at the
/// same slot in processing order.
#[derive(Debug, Default)]
pub struct VersionIndex {
    stacks: BTreeMap<Coordinate, Vec<NodeIndex>>,
    aliases: BTreeMap<Coordinate, Coordinate>,
}

impl VersionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places the authored version at the bottom of the stack unless it is already present.
    pub fn register_first_version(&mut self, coordinate: Coordinate, node: NodeIndex) {
        self.remember_alias(&coordinate);
        let stack = self.stacks.entry(coordinate).or_default();
        if !stack.contains(&node) {
            stack.insert(0, node);
        }
    }

    pub fn register_version(&mut self, coordinate: Coordinate, node: NodeIndex) {
        self.remember_alias(&coordinate);
        let stack = self.stacks.entry(coordinate).or_default();
        if !stack.contains(&node) {
            stack.push(node);
        }
    }

    /// Most recent version that is still valid, falling back to older ones.
    #[must_use]
    pub fn current_active_version(&self, coordinate: &Coordinate, arena: &NodeArena) -> Option<NodeIndex> {
        self.versions(coordinate).iter().rev().copied().find(|node| arena.is_valid(*node))
    }

    #[must_use]
    pub fn latest_registered(&self, coordinate: &Coordinate) -> Option<NodeIndex> {
        self.versions(coordinate).last().copied()
    }

    #[must_use]
    pub fn has_version(&self, coordinate: &Coordinate) -> bool {
        !self.versions(coordinate).is_empty()
    }

    #[must_use]
    pub fn versions(&self, coordinate: &Coordinate) -> &[NodeIndex] {
        if let Some(stack) = self.stacks.get(coordinate) {
            return stack;
        }
        self.aliases
            .get(coordinate)
            .and_then(|target| self.stacks.get(target))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn remember_alias(&mut self, coordinate: &Coordinate) {
        if let Coordinate::Article(article) = coordinate {
            if let Some(alias) = article.annex_alias() {
                self.aliases.entry(Coordinate::Article(alias)).or_insert_with(|| coordinate.clone());
            }
        }
    }
}
