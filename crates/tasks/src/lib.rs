//! The task contract and the pipeline stages of a surface experiment.
//!
//! Every stage implements [`Task`]: `prepare` resolves paths, binaries and
//! arguments for one node and validates its inputs, `execute` runs the
//! prepared steps through a [`surfexp_tools::CommandRunner`], and `postfix`
//! archives logs. Stages form the closed [`SurfaceTask`] variant set and are
//! looked up by kind in the [`TaskRegistry`].

#![warn(missing_docs)]

pub mod error;
pub mod geometry;
pub mod context;
pub mod declaration;
pub mod prepared;
pub mod binary;
pub mod static_fields;
pub mod cycling;
pub mod assimilation;
pub mod surface;
pub mod registry;

pub use error::{ExecutionResult, FailureReason, TaskError};
pub use geometry::Geometry;
pub use context::TaskContext;
pub use declaration::{CycleOffset, Predecessor, Requirement, Scope, TaskDeclaration};
pub use prepared::{PreparedTask, Step};
pub use surface::{SurfaceTask, Task};
pub use registry::{run_task, TaskOutcome, TaskRegistry};
