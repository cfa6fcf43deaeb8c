//! External command execution.
//!
//! Model binaries, converters and batch-system commands all run through the
//! [`CommandRunner`] seam so that they can be replaced in tests.

#![warn(missing_docs)]

pub mod r#trait;
pub mod process;

pub use r#trait::{CommandOutput, CommandRunner, CommandSpec, ToolError};
pub use process::ProcessRunner;
