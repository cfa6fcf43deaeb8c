//! Durable experiment storage for surfexp.
//!
//! This crate provides a trait-based storage interface for the state that
//! must survive between invocations (cycle progress, the last emitted suite,
//! the scheduler handle table) with a JSON file implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;

pub use trait_::{HandleRecord, HandleTable, LockMode, Result, Storage, StorageError, StorageLock};
pub use json_storage::JsonStorage;
