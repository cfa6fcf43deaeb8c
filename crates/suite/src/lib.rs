//! Suite building.
//!
//! Turns one resolved configuration and the current cycle state into a
//! dependency ordered [`surfexp_core::SuiteDefinition`]. Suites grow by
//! appending the next cycle window to the previously emitted graph.

#![warn(missing_docs)]

pub mod error;
pub mod pipeline;
pub mod builder;

pub use error::{Result, SuiteBuildError};
pub use pipeline::{Pipeline, DEFAULT_PIPELINE};
pub use builder::{family_path, SuiteBuilder};
