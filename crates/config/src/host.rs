//! Host profiles.

use crate::error::{ConfigError, Result};
use crate::layer::LayerFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Path templates and submission parameters of one execution host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostProfile {
    /// Host tag
    pub name: String,

    /// Path templates, e.g. `wrk` -> `@SCRATCH@/@EXP@/@YYYY@@MM@@DD@_@HH@`
    #[serde(default)]
    pub paths: BTreeMap<String, String>,

    /// Submission parameters (queue, bindir, ...)
    #[serde(default)]
    pub submission: BTreeMap<String, Value>,
}

impl HostProfile {
    /// Create an empty profile.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a path template.
    pub fn with_path(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.paths.insert(key.into().to_uppercase(), template.into());
        self
    }

    /// Add a submission parameter.
    pub fn with_submission(mut self, key: impl Into<String>, value: Value) -> Self {
        self.submission.insert(key.into(), value);
        self
    }

    /// Path template by (case-insensitive) key.
    pub fn path(&self, key: &str) -> Option<&str> {
        let upper = key.to_uppercase();
        self.paths
            .iter()
            .find(|(k, _)| k.to_uppercase() == upper)
            .map(|(_, v)| v.as_str())
    }

    /// Parse a profile document.
    pub fn parse(text: &str, format: LayerFormat) -> Result<Self> {
        let profile: HostProfile = match format {
            LayerFormat::Json => serde_json::from_str(text)?,
            LayerFormat::Yaml => serde_yaml::from_str(text)?,
        };
        if profile.name.is_empty() {
            return Err(ConfigError::invalid("name", "host profile needs a name"));
        }
        Ok(profile)
    }

    /// Load a profile from a JSON or YAML file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = LayerFormat::from_path(path)?;
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text, format)
    }
}
