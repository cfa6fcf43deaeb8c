//! Cycle progress of an experiment.

use crate::time::Dtg;
use serde::{Deserialize, Serialize};

/// Lifecycle of an experiment's cycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStatus {
    /// No persisted state yet
    Uninitialized,
    /// Cycles remain to be processed
    Active,
    /// The last cycle boundary has been reached
    Completed,
}

/// Where an experiment currently is in time.
///
/// Invariant: `begin <= last_processed <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleState {
    /// First cycle of the experiment
    pub begin: Dtg,
    /// Last cycle boundary of the experiment
    pub end: Dtg,
    /// Current cycle (the next one to be built)
    pub last_processed: Dtg,
}

impl CycleState {
    /// Fresh state positioned at `begin`.
    pub fn new(begin: Dtg, end: Dtg) -> Self {
        Self {
            begin,
            end,
            last_processed: begin,
        }
    }

    /// Whether the ordering invariant holds.
    pub fn is_consistent(&self) -> bool {
        self.begin <= self.last_processed && self.last_processed <= self.end
    }

    /// Active or completed.
    pub fn status(&self) -> ProgressStatus {
        if self.last_processed >= self.end {
            ProgressStatus::Completed
        } else {
            ProgressStatus::Active
        }
    }

    /// Up to `count` cycles of the active window, starting at the current
    /// cycle and stepping by `cycle_length`. The end boundary is exclusive.
    pub fn window(&self, cycle_length: chrono::Duration, count: usize) -> Vec<Dtg> {
        let mut cycles = Vec::new();
        if cycle_length <= chrono::Duration::zero() {
            return cycles;
        }
        let mut cycle = self.last_processed;
        while cycle < self.end && cycles.len() < count {
            cycles.push(cycle);
            cycle += cycle_length;
        }
        cycles
    }
}
