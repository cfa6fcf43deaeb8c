//! Layered experiment configuration and host path resolution.
//!
//! Configuration fragments (system defaults, host input, experiment, user
//! overrides, per-member settings) are merged into one immutable
//! [`ResolvedConfig`]. Host profiles carry the path templates of one
//! execution host and feed the [`PathResolver`].

#![warn(missing_docs)]

pub mod error;
pub mod layer;
pub mod resolved;
pub mod store;
pub mod host;
pub mod paths;

pub use error::{ConfigError, MissingKeyError, Result, UnresolvedVariableError};
pub use layer::{merge, ConfigLayer, LayerFormat};
pub use resolved::ResolvedConfig;
pub use store::ConfigStore;
pub use host::HostProfile;
pub use paths::{Bindings, PathResolver};
