//! Experiment execution: builds the suite for the active cycle window, hands
//! it to a batch system, collects the node states and advances progress.

#![warn(missing_docs)]

pub mod dependency;
pub mod report;
pub mod local;
pub mod engine;

pub use dependency::{DependencyResolver, Resolution};
pub use report::{NodeReport, NodeState, RunReport};
pub use local::{LocalBatchSystem, LocalJob};
pub use engine::{node_context, ExperimentEngine, TASK_COMMAND_KEY};
