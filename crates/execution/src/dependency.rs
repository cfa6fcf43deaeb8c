//! Blocking analysis over a suite and the observed node states.

use std::collections::BTreeMap;
use surfexp_core::{NodeId, SuiteDefinition, TaskStatus};

/// Whether a node can still run, given its predecessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every predecessor succeeded
    Ready,
    /// Some predecessor has not finished yet
    Waiting(Vec<NodeId>),
    /// A failed or aborted node upstream prevents this one from running
    Blocked(NodeId),
}

/// Resolves node dependencies against known statuses.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    /// Root cause of every blocked node seen so far
    blocked_by: BTreeMap<NodeId, NodeId>,
}

impl DependencyResolver {
    /// Create a resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every node of `suite` in topological order.
    ///
    /// A node is blocked when a predecessor failed or was aborted, or is
    /// itself blocked; the reported blocker is the failed node at the root.
    pub fn resolve(
        &mut self,
        suite: &SuiteDefinition,
        statuses: &BTreeMap<NodeId, TaskStatus>,
    ) -> Vec<(NodeId, Resolution)> {
        let order = suite
            .topological_order()
            .unwrap_or_else(|_| suite.nodes.iter().map(|n| n.id).collect());
        let mut resolved = Vec::with_capacity(order.len());

        for id in order {
            let Some(node) = suite.node(&id) else {
                continue;
            };
            let mut waiting = Vec::new();
            let mut blocker = None;
            for pred in &node.predecessors {
                if let Some(root) = self.blocked_by.get(pred) {
                    blocker = Some(*root);
                    break;
                }
                match statuses.get(pred) {
                    Some(TaskStatus::Succeeded) => {}
                    Some(TaskStatus::Failed) | Some(TaskStatus::Aborted) => {
                        blocker = Some(*pred);
                        break;
                    }
                    _ => waiting.push(*pred),
                }
            }

            let resolution = match blocker {
                Some(root) => {
                    self.blocked_by.insert(id, root);
                    Resolution::Blocked(root)
                }
                None if waiting.is_empty() => Resolution::Ready,
                None => Resolution::Waiting(waiting),
            };
            resolved.push((id, resolution));
        }
        resolved
    }
}
