//! Configuration fragments and the layered merge.

use crate::error::{ConfigError, Result};
use crate::resolved::ResolvedConfig;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// On-disk format of a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerFormat {
    /// JSON document
    Json,
    /// YAML document
    Yaml,
}

impl LayerFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(LayerFormat::Json),
            Some("yml") | Some("yaml") => Ok(LayerFormat::Yaml),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// One configuration fragment: a mapping of (possibly dotted) keys to values.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLayer {
    /// Where the fragment came from
    pub name: String,
    values: Value,
}

impl ConfigLayer {
    /// Build a layer from a mapping. Dotted keys are expanded into nested
    /// mappings, so `{"a.b": 1}` and `{"a": {"b": 1}}` are the same layer.
    pub fn new(name: impl Into<String>, values: Value) -> Result<Self> {
        let name = name.into();
        let Value::Object(map) = values else {
            return Err(ConfigError::InvalidLayer {
                name,
                reason: "top level must be a mapping".to_string(),
            });
        };
        Ok(Self {
            name,
            values: expand_dotted(map),
        })
    }

    /// Parse a layer from text.
    pub fn parse(name: impl Into<String>, text: &str, format: LayerFormat) -> Result<Self> {
        let values: Value = match format {
            LayerFormat::Json => serde_json::from_str(text)?,
            LayerFormat::Yaml => serde_yaml::from_str(text)?,
        };
        Self::new(name, values)
    }

    /// Load a layer from a JSON or YAML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = LayerFormat::from_path(path)?;
        let text = tokio::fs::read_to_string(path).await?;
        debug!("Loaded configuration layer {}", path.display());
        Self::parse(path.display().to_string(), &text, format)
    }

    /// The nested mapping of this layer.
    pub fn values(&self) -> &Value {
        &self.values
    }
}

/// Merge layers in order. Later layers win for identical keys.
pub fn merge(layers: &[ConfigLayer]) -> ResolvedConfig {
    let mut merged = Value::Object(Map::new());
    for layer in layers {
        debug!("Merging configuration layer {}", layer.name);
        deep_update(&mut merged, &layer.values);
    }
    ResolvedConfig::from_value(merged)
}

/// Recursive update of `target` with `overrides`.
///
/// A non-empty mapping in `overrides` is merged key by key; every other value
/// (scalars, lists, empty mappings) replaces what `target` held at that key.
pub(crate) fn deep_update(target: &mut Value, overrides: &Value) {
    let Value::Object(overrides) = overrides else {
        *target = overrides.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(target_map) = target else {
        return;
    };
    for (key, value) in overrides {
        match value {
            Value::Object(inner) if !inner.is_empty() => {
                let slot = target_map
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                deep_update(slot, value);
            }
            _ => {
                target_map.insert(key.clone(), value.clone());
            }
        }
    }
}

fn expand_dotted(map: Map<String, Value>) -> Value {
    let mut expanded = Value::Object(Map::new());
    for (key, value) in map {
        let value = match value {
            Value::Object(inner) => expand_dotted(inner),
            other => other,
        };
        let nested = key
            .split('.')
            .rev()
            .fold(value, |acc, part| {
                let mut m = Map::new();
                m.insert(part.to_string(), acc);
                Value::Object(m)
            });
        deep_update(&mut expanded, &nested);
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(name: &str, v: Value) -> ConfigLayer {
        ConfigLayer::new(name, v).unwrap()
    }

    #[test]
    fn test_dotted_keys_expand() {
        let l = layer("a", json!({"general.times.start": "2022020100", "general": {"case": "x"}}));
        assert_eq!(
            l.values(),
            &json!({"general": {"case": "x", "times": {"start": "2022020100"}}})
        );
    }

    #[test]
    fn test_later_layer_wins_and_lists_replace() {
        let defaults = layer("defaults", json!({
            "suite_control": {"pipeline": ["prep", "forcing", "forecast"], "cycles_ahead": 1},
            "general": {"times": {"cycle_length": "PT3H"}}
        }));
        let user = layer("user", json!({
            "suite_control.pipeline": ["prep", "forecast"],
            "general": {"times": {"cycle_length": "PT6H"}}
        }));
        let merged = merge(&[defaults, user]);
        assert_eq!(
            merged.get("suite_control.pipeline").unwrap(),
            &json!(["prep", "forecast"])
        );
        assert_eq!(merged.get("suite_control.cycles_ahead").unwrap(), &json!(1));
        assert_eq!(merged.get_str("general.times.cycle_length").unwrap(), "PT6H");
    }

    #[test]
    fn test_empty_mapping_replaces() {
        let a = layer("a", json!({"task": {"args": {"pert": 1}}}));
        let b = layer("b", json!({"task": {"args": {}}}));
        let merged = merge(&[a, b]);
        assert_eq!(merged.get("task.args").unwrap(), &json!({}));
    }

    #[test]
    fn test_merge_is_deterministic() {
        let layers = vec![
            layer("a", json!({"x": {"y": 1, "z": [1, 2]}, "w": "s"})),
            layer("b", json!({"x.y": 2, "v": true})),
        ];
        assert_eq!(merge(&layers), merge(&layers));
    }

    #[test]
    fn test_non_mapping_layer_rejected() {
        assert!(ConfigLayer::new("bad", json!([1, 2])).is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let l = ConfigLayer::parse(
            "y",
            "general:\n  case: demo\nensemble.members: [0, 1]\n",
            LayerFormat::Yaml,
        )
        .unwrap();
        let merged = merge(&[l]);
        assert_eq!(merged.get_str("general.case").unwrap(), "demo");
        assert_eq!(merged.get("ensemble.members").unwrap(), &json!([0, 1]));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.json");
        tokio::fs::write(&path, r#"{"general": {"case": "file"}}"#).await.unwrap();
        let l = ConfigLayer::load(&path).await.unwrap();
        assert_eq!(merge(&[l]).get_str("general.case").unwrap(), "file");

        let bad = dir.path().join("exp.toml");
        assert!(matches!(
            ConfigLayer::load(&bad).await,
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
