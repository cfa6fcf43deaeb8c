//! Suite definition - the task graph handed to a scheduler.

use crate::id::{MemberId, NodeId, TaskKind};
use crate::time::Dtg;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Errors raised when a suite graph would become inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuiteGraphError {
    /// A node with this identity is already part of the suite
    #[error("Duplicate node: {0}")]
    DuplicateNode(NodeId),

    /// A predecessor is not part of the suite
    #[error("Node {node} depends on unknown node {predecessor}")]
    UnknownPredecessor {
        /// Dependent node
        node: NodeId,
        /// Missing predecessor
        predecessor: NodeId,
    },

    /// The graph contains a cycle
    #[error("Dependency cycle involving {0:?}")]
    Cycle(Vec<NodeId>),
}

/// One task instance of the suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Identity (kind, cycle, member)
    pub id: NodeId,

    /// Resolved parameters (paths, times)
    pub parameters: BTreeMap<String, String>,

    /// Nodes that must complete before this one
    pub predecessors: Vec<NodeId>,
}

impl TaskNode {
    /// Create a node without parameters or predecessors.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            parameters: BTreeMap::new(),
            predecessors: Vec::new(),
        }
    }

    /// Pipeline stage.
    pub fn kind(&self) -> TaskKind {
        self.id.kind
    }

    /// Cycle timestamp.
    pub fn cycle(&self) -> Dtg {
        self.id.cycle
    }

    /// Member, if member specific.
    pub fn member(&self) -> Option<MemberId> {
        self.id.member
    }
}

/// A named grouping of nodes (experiment, cycle day, cycle time, member).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    /// Slash separated path, e.g. `/exp/20220201/0000/mbr001`
    pub path: String,

    /// Nodes directly in this family
    pub nodes: Vec<NodeId>,
}

/// The task graph for one or more cycles of an experiment.
///
/// Nodes are kept in insertion order and a node may only be inserted after
/// all of its predecessors, so insertion order is always a valid topological
/// order and the graph can only grow by appending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteDefinition {
    /// Suite (experiment) name
    pub name: String,

    /// Nodes in insertion order
    pub nodes: Vec<TaskNode>,

    /// Family groupings
    pub families: Vec<Family>,
}

impl SuiteDefinition {
    /// Create an empty suite.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            families: Vec::new(),
        }
    }

    /// Whether a node is part of the suite.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }

    /// Look up a node.
    pub fn node(&self, id: &NodeId) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Append a node. Every predecessor must already be present.
    pub fn insert(&mut self, node: TaskNode) -> Result<(), SuiteGraphError> {
        if self.contains(&node.id) {
            return Err(SuiteGraphError::DuplicateNode(node.id));
        }
        if let Some(missing) = node.predecessors.iter().find(|p| !self.contains(p)) {
            return Err(SuiteGraphError::UnknownPredecessor {
                node: node.id,
                predecessor: *missing,
            });
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Add a node to a family, creating the family on first use.
    pub fn add_to_family(&mut self, path: &str, id: NodeId) {
        match self.families.iter_mut().find(|f| f.path == path) {
            Some(family) => {
                if !family.nodes.contains(&id) {
                    family.nodes.push(id);
                }
            }
            None => self.families.push(Family {
                path: path.to_string(),
                nodes: vec![id],
            }),
        }
    }

    /// All edges as (predecessor, dependent).
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.nodes
            .iter()
            .flat_map(|n| n.predecessors.iter().map(move |p| (*p, n.id)))
            .collect()
    }

    /// Direct dependents of a node.
    pub fn dependents(&self, id: &NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.predecessors.contains(id))
            .map(|n| n.id)
            .collect()
    }

    /// Every node reachable from `id` along dependency edges.
    pub fn downstream(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = self.dependents(id).into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.dependents(&next));
            }
        }
        seen
    }

    /// Distinct cycles in the suite, ascending.
    pub fn cycles(&self) -> BTreeSet<Dtg> {
        self.nodes.iter().map(|n| n.id.cycle).collect()
    }

    /// Nodes belonging to one cycle.
    pub fn nodes_for_cycle(&self, cycle: Dtg) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter().filter(move |n| n.id.cycle == cycle)
    }

    /// Get node ids in topological order (predecessors first).
    ///
    /// Ties are broken by insertion order, so the result is deterministic.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, SuiteGraphError> {
        let position: HashMap<NodeId, usize> =
            self.nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();

        let mut remaining: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| n.predecessors.iter().filter(|p| position.contains_key(p)).count())
            .collect();
        let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for pred in &node.predecessors {
                if let Some(&p) = position.get(pred) {
                    reverse[p].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> =
            (0..self.nodes.len()).filter(|&i| remaining[i] == 0).collect();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(i) = ready.pop_first() {
            sorted.push(self.nodes[i].id);
            for &dep in &reverse[i] {
                remaining[dep] -= 1;
                if remaining[dep] == 0 {
                    ready.insert(dep);
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let stuck = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| remaining[*i] > 0)
                .map(|(_, n)| n.id)
                .collect();
            return Err(SuiteGraphError::Cycle(stuck));
        }
        Ok(sorted)
    }

    /// Render as pretty JSON for the external scheduler.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
