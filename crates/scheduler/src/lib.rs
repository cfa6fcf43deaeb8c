//! Scheduler gateway.
//!
//! Translates suites and (experiment, cycle, member, task) selections into
//! submit/kill/status calls against an external batch system, keeping the
//! node to handle mapping in storage.

#![warn(missing_docs)]

pub mod error;
pub mod selector;
pub mod batch;
pub mod command;
pub mod gateway;

pub use error::{BatchError, CommandParseError, GatewayError, Result};
pub use selector::{Operation, SchedulerCommand, TaskSelector};
pub use batch::{BatchSystem, JobRequest};
pub use command::{CommandBatchSystem, CommandTemplates};
pub use gateway::{RetryPolicy, SchedulerGateway, StatusReply, SubmitReport};
