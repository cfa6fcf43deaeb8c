//! surfexp core data models.
//!
//! This crate defines the data structures shared by every layer of the
//! cycling control plane: date/time groups, ensemble members, task kinds,
//! the persisted cycle state and the suite graph handed to a scheduler.

#![warn(missing_docs)]

// Identities
mod id;
mod time;

// Cycle progress
mod cycle;

// Suite graph
mod suite;
mod handle;

// Re-exports
pub use id::{MemberId, NodeId, TaskKind, UnknownTaskKind};
pub use time::{
    compact_dtg, decade, format_dtg, parse_dtg, parse_duration, Dtg, TimeParseError,
};
pub use cycle::{CycleState, ProgressStatus};
pub use suite::{Family, SuiteDefinition, SuiteGraphError, TaskNode};
pub use handle::{SchedulerHandle, TaskStatus};
