//! Per-node outcome of a run.

use crate::dependency::{DependencyResolver, Resolution};
use serde::Serialize;
use std::collections::BTreeMap;
use surfexp_core::{CycleState, Dtg, NodeId, SchedulerHandle, SuiteDefinition, TaskStatus};

/// What is known about one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    /// The node has no scheduler handle
    NotSubmitted,
    /// Status reported by the batch system
    Status {
        /// Reported status
        status: TaskStatus,
    },
    /// The batch system did not answer
    Indeterminate {
        /// Last status seen for the node
        last_known: Option<TaskStatus>,
    },
    /// The node never ran because an upstream node failed or was aborted
    Blocked {
        /// The failed node at the root of the blockage
        by: NodeId,
    },
}

impl NodeState {
    /// Status when one was reported.
    pub fn status(&self) -> Option<TaskStatus> {
        match self {
            NodeState::Status { status } => Some(*status),
            _ => None,
        }
    }

    fn never_ran(&self) -> bool {
        matches!(
            self,
            NodeState::NotSubmitted
                | NodeState::Status {
                    status: TaskStatus::Pending | TaskStatus::Aborted
                }
        )
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::NotSubmitted => write!(f, "not submitted"),
            NodeState::Status { status } => write!(f, "{}", status),
            NodeState::Indeterminate { last_known: Some(last) } => write!(f, "indeterminate (last {})", last),
            NodeState::Indeterminate { last_known: None } => write!(f, "indeterminate"),
            NodeState::Blocked { by } => write!(f, "blocked by {}", by),
        }
    }
}

/// One line of a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    /// Node
    pub node: NodeId,
    /// Scheduler handle, when submitted
    pub handle: Option<SchedulerHandle>,
    /// Observed state
    pub state: NodeState,
}

/// Every node of a suite with its state, in topological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Experiment name
    pub experiment: String,
    /// Node lines
    pub nodes: Vec<NodeReport>,
    /// Progress after the run, when it advanced
    pub advanced: Option<CycleState>,
}

impl RunReport {
    /// Build a report from the observed node states.
    ///
    /// Nodes that never ran (not submitted, pending or aborted) below a
    /// failed or aborted node are reported as blocked by the root failure.
    pub fn from_observed(
        suite: &SuiteDefinition,
        observed: BTreeMap<NodeId, (Option<SchedulerHandle>, NodeState)>,
    ) -> Self {
        let statuses: BTreeMap<NodeId, TaskStatus> = observed
            .iter()
            .filter_map(|(id, (_, state))| state.status().map(|s| (*id, s)))
            .collect();
        let mut observed = observed;
        let nodes = DependencyResolver::new()
            .resolve(suite, &statuses)
            .into_iter()
            .map(|(id, resolution)| {
                let (handle, state) = observed.remove(&id).unwrap_or((None, NodeState::NotSubmitted));
                let state = match resolution {
                    Resolution::Blocked(by) if state.never_ran() => NodeState::Blocked { by },
                    _ => state,
                };
                NodeReport { node: id, handle, state }
            })
            .collect();
        Self {
            experiment: suite.name.clone(),
            nodes,
            advanced: None,
        }
    }

    /// State of one node.
    pub fn state(&self, node: &NodeId) -> Option<NodeState> {
        self.nodes.iter().find(|r| r.node == *node).map(|r| r.state)
    }

    /// Whether every node of `cycle` succeeded. A cycle without nodes is not
    /// complete.
    pub fn cycle_succeeded(&self, cycle: Dtg) -> bool {
        let mut lines = self.nodes.iter().filter(|r| r.node.cycle == cycle).peekable();
        lines.peek().is_some() && lines.all(|r| r.state.status() == Some(TaskStatus::Succeeded))
    }

    /// Whether any node failed, was aborted or is blocked.
    pub fn has_failures(&self) -> bool {
        self.nodes.iter().any(|r| {
            matches!(
                r.state,
                NodeState::Blocked { .. }
                    | NodeState::Status {
                        status: TaskStatus::Failed | TaskStatus::Aborted
                    }
            )
        })
    }

    /// Number of nodes per state label.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for line in &self.nodes {
            let label = match line.state {
                NodeState::NotSubmitted => "not_submitted".to_string(),
                NodeState::Status { status } => status.to_string(),
                NodeState::Indeterminate { .. } => "indeterminate".to_string(),
                NodeState::Blocked { .. } => "blocked".to_string(),
            };
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
    }
}
