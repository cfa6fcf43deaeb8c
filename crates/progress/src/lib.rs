//! Cycle progress tracking.
//!
//! The persisted cycle state machine: initialise, advance, reset.

#![warn(missing_docs)]

pub mod tracker;

pub use tracker::{ProgressError, ProgressTracker, Result};
