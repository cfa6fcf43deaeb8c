//! Configuration errors.

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// A required key is absent after merge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Missing configuration key: {key}")]
pub struct MissingKeyError {
    /// Dotted key
    pub key: String,
}

/// A path template references a variable without a binding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unresolved variable @{variable}@ in template {template}")]
pub struct UnresolvedVariableError {
    /// Template being resolved
    pub template: String,
    /// Placeholder name without markers
    pub variable: String,
}

/// Errors that can occur while loading, merging or reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Key absent
    #[error(transparent)]
    MissingKey(#[from] MissingKeyError),

    /// Key present with the wrong type or an unparsable value
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue {
        /// Dotted key
        key: String,
        /// What was wrong
        reason: String,
    },

    /// Template placeholder without binding
    #[error(transparent)]
    UnresolvedVariable(#[from] UnresolvedVariableError),

    /// Resolved path is not absolute
    #[error("Resolved path is not absolute: {0}")]
    NotAbsolute(String),

    /// Host path templates refer to each other without end
    #[error("Template expansion does not terminate: {0}")]
    RecursiveTemplate(String),

    /// No host profile registered under this tag
    #[error("Unknown host profile: {0}")]
    UnknownHost(String),

    /// A fragment is not a mapping
    #[error("Invalid configuration layer {name}: {reason}")]
    InvalidLayer {
        /// Layer name
        name: String,
        /// What was wrong
        reason: String,
    },

    /// File extension not recognised
    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
