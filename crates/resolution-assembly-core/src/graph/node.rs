//! Arena of validity cells.
//!
//! A node is valid when every dependency is valid and no repealer is valid. Values are memoized;
//! adding an edge invalidates the node and notifies subscribers, which recompute and keep
//! propagating only when their own value flips. Edges are stored as index sets so the whole
//! graph is dropped with the arena.

use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::model::{ChangeId, EntityId};

/// Identity of a validity cell: a persisted entity or a change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum NodeKey {
    Entity(EntityId),
    Change(ChangeId),
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity(id) => write!(f, "entity:{id}"),
            Self::Change(id) => write!(f, "change:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeIndex(usize);

/// Odd repealer cycles have no stable value; a node flipping more often than this within one
/// invalidation pass stops propagating.
const MAX_FLIPS_PER_PASS: u8 = 4;

#[derive(Debug)]
pub struct GraphNode {
    key: NodeKey,
    dependencies: BTreeSet<NodeIndex>,
    repealers: BTreeSet<NodeIndex>,
    subscribers: BTreeSet<NodeIndex>,
    cached: Cell<Option<bool>>,
    evaluating: Cell<bool>,
}

impl GraphNode {
    fn new(key: NodeKey) -> Self {
        Self {
            key,
            dependencies: BTreeSet::new(),
            repealers: BTreeSet::new(),
            subscribers: BTreeSet::new(),
            cached: Cell::new(None),
            evaluating: Cell::new(false),
        }
    }

    #[must_use]
    pub fn key(&self) -> NodeKey {
        self.key
    }

    #[must_use]
    pub fn dependencies(&self) -> &BTreeSet<NodeIndex> {
        &self.dependencies
    }

    #[must_use]
    pub fn repealers(&self) -> &BTreeSet<NodeIndex> {
        &self.repealers
    }
}

#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<GraphNode>,
    by_key: HashMap<NodeKey, NodeIndex>,
}

impl NodeArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, key: NodeKey) -> NodeIndex {
        if let Some(index) = self.by_key.get(&key) {
            return *index;
        }
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(GraphNode::new(key));
        self.by_key.insert(key, index);
        index
    }

    #[must_use]
    pub fn find(&self, key: NodeKey) -> Option<NodeIndex> {
        self.by_key.get(&key).copied()
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> &GraphNode {
        &self.nodes[index.0]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> {
        (0..self.nodes.len()).map(NodeIndex)
    }

    /// AND-edge: `node` is valid only while `dependency` is valid. Self-edges are ignored.
    pub fn add_dependency(&mut self, node: NodeIndex, dependency: NodeIndex) {
        if node == dependency || !self.nodes[node.0].dependencies.insert(dependency) {
            return;
        }
        self.nodes[dependency.0].subscribers.insert(node);
        self.invalidate(node);
    }

    /// OR-edge: `node` is void while `repealer` is valid. Self-edges are ignored.
    pub fn add_repealer(&mut self, node: NodeIndex, repealer: NodeIndex) {
        if node == repealer || !self.nodes[node.0].repealers.insert(repealer) {
            return;
        }
        self.nodes[repealer.0].subscribers.insert(node);
        self.invalidate(node);
    }

    #[must_use]
    pub fn is_valid(&self, index: NodeIndex) -> bool {
        let node = &self.nodes[index.0];
        if let Some(valid) = node.cached.get() {
            return valid;
        }
        let valid = self.compute(index);
        node.cached.set(Some(valid));
        valid
    }

    fn compute(&self, index: NodeIndex) -> bool {
        let node = &self.nodes[index.0];
        if node.evaluating.get() {
            tracing::warn!(node = %node.key, "validity cycle detected; treating node as invalid");
            return false;
        }
        node.evaluating.set(true);
        let valid = node.dependencies.iter().all(|dependency| self.is_valid(*dependency))
            && !node.repealers.iter().any(|repealer| self.is_valid(*repealer));
        node.evaluating.set(false);
        valid
    }

    fn invalidate(&self, start: NodeIndex) {
        let mut pending = vec![start];
        let mut flips: HashMap<NodeIndex, u8> = HashMap::new();
        while let Some(index) = pending.pop() {
            let node = &self.nodes[index.0];
            if node.subscribers.is_empty() {
                node.cached.set(None);
                continue;
            }
            if node.evaluating.get() {
                continue;
            }
            let previous = node.cached.replace(None);
            let current = self.is_valid(index);
            if previous != Some(current) {
                let count = flips.entry(index).or_insert(0);
                *count = count.saturating_add(1);
                if *count > MAX_FLIPS_PER_PASS {
                    tracing::warn!(node = %node.key, "validity oscillates inside a cycle; propagation stopped");
                    continue;
                }
                pending.extend(node.subscribers.iter().copied());
            }
        }
    }

    /// The valid repealer that ultimately voids `index`, searching direct repealers first and
    /// then invalid dependencies.
    #[must_use]
    pub fn repealer_of(&self, index: NodeIndex) -> Option<NodeIndex> {
        let mut visited = BTreeSet::new();
        self.find_repealer(index, &mut visited)
    }

    fn find_repealer(&self, index: NodeIndex, visited: &mut BTreeSet<NodeIndex>) -> Option<NodeIndex> {
        if !visited.insert(index) {
            return None;
        }
        let node = &self.nodes[index.0];
        if let Some(repealer) = node.repealers.iter().find(|repealer| self.is_valid(**repealer)) {
            return Some(*repealer);
        }
        node.dependencies
            .iter()
            .filter(|dependency| !self.is_valid(**dependency))
            .find_map(|dependency| self.find_repealer(*dependency, visited))
    }
}
