//! The merged, immutable configuration view.

use crate::error::{ConfigError, MissingKeyError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use surfexp_core::{parse_dtg, parse_duration, Dtg, MemberId};

/// Immutable mapping from dotted keys to values, produced by [`crate::merge`].
///
/// Cloning is cheap; the underlying document is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    root: Arc<Value>,
    member: Option<MemberId>,
}

impl ResolvedConfig {
    pub(crate) fn from_value(root: Value) -> Self {
        Self {
            root: Arc::new(root),
            member: None,
        }
    }

    pub(crate) fn for_member(root: Value, member: MemberId) -> Self {
        Self {
            root: Arc::new(root),
            member: Some(member),
        }
    }

    /// Member this view was resolved for, if any.
    pub fn member(&self) -> Option<MemberId> {
        self.member
    }

    /// The whole document.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Look up a dotted key.
    pub fn find(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(self.root.as_ref(), |node, part| node.as_object()?.get(part))
    }

    /// Whether a key is defined.
    pub fn contains(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Get a value or fail with [`MissingKeyError`].
    pub fn get(&self, key: &str) -> std::result::Result<&Value, MissingKeyError> {
        self.find(key).ok_or_else(|| MissingKeyError {
            key: key.to_string(),
        })
    }

    /// Get a value, falling back to `default`.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.find(key).unwrap_or(default)
    }

    /// Deserialize a value into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.get(key)?;
        serde_json::from_value(value.clone()).map_err(|e| ConfigError::invalid(key, e.to_string()))
    }

    /// Deserialize a value into `T` if the key is present.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.find(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ConfigError::invalid(key, e.to_string())),
        }
    }

    /// String value.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.get(key)?
            .as_str()
            .ok_or_else(|| ConfigError::invalid(key, "expected a string"))
    }

    /// Boolean value with a default for absent keys.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.find(key) {
            None => Ok(default),
            Some(v) => v
                .as_bool()
                .ok_or_else(|| ConfigError::invalid(key, "expected a boolean")),
        }
    }

    /// Integer value with a default for absent keys.
    pub fn get_u64_or(&self, key: &str, default: u64) -> Result<u64> {
        match self.find(key) {
            None => Ok(default),
            Some(v) => v
                .as_u64()
                .ok_or_else(|| ConfigError::invalid(key, "expected a non-negative integer")),
        }
    }

    /// List of strings; absent keys give an empty list.
    pub fn get_str_list(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.get_opt::<Vec<String>>(key)?.unwrap_or_default())
    }

    /// Duration value (`PT3H`, `3h`, ...).
    pub fn get_duration(&self, key: &str) -> Result<chrono::Duration> {
        let raw = self.get_str(key)?;
        parse_duration(raw).map_err(|e| ConfigError::invalid(key, e.to_string()))
    }

    /// Date/time group value.
    pub fn get_dtg(&self, key: &str) -> Result<Dtg> {
        let raw = match self.get(key)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return Err(ConfigError::invalid(key, "expected a date/time group")),
        };
        parse_dtg(&raw).map_err(|e| ConfigError::invalid(key, e.to_string()))
    }

    /// Check that every key in `keys` is defined.
    pub fn require<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for key in keys {
            self.get(key)?;
        }
        Ok(())
    }

    /// String leaves below `prefix`, flattened to dotted keys relative to it.
    pub fn string_leaves(&self, prefix: &str) -> Vec<(String, String)> {
        let mut leaves = Vec::new();
        if let Some(node) = self.find(prefix) {
            collect_leaves(node, String::new(), &mut leaves);
        }
        leaves
    }
}

fn collect_leaves(node: &Value, path: String, out: &mut Vec<(String, String)>) {
    match node {
        Value::Object(map) => {
            for (k, v) in map {
                let next = if path.is_empty() { k.clone() } else { format!("{}.{}", path, k) };
                collect_leaves(v, next, out);
            }
        }
        Value::String(s) => out.push((path, s.clone())),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{merge, ConfigLayer};
    use serde_json::json;

    fn config(v: Value) -> ResolvedConfig {
        merge(&[ConfigLayer::new("t", v).unwrap()])
    }

    #[test]
    fn test_get_and_default() {
        let c = config(json!({"general": {"case": "exp", "times": {"cycle_length": "PT3H"}}}));
        assert_eq!(c.get_str("general.case").unwrap(), "exp");
        assert_eq!(
            c.get("general.nope").unwrap_err(),
            MissingKeyError { key: "general.nope".into() }
        );
        let fallback = json!(20);
        assert_eq!(c.get_or("general.max_tasks", &fallback), &json!(20));
        assert_eq!(c.get_duration("general.times.cycle_length").unwrap(), chrono::Duration::hours(3));
    }

    #[test]
    fn test_typed_errors() {
        let c = config(json!({"a": 1, "b": "x", "t": 2022020100u64}));
        assert!(matches!(c.get_str("a"), Err(ConfigError::InvalidValue { .. })));
        assert!(matches!(c.get_bool_or("b", false), Err(ConfigError::InvalidValue { .. })));
        assert!(c.get_bool_or("missing", true).unwrap());
        assert_eq!(c.get_dtg("t").unwrap(), parse_dtg("2022020100").unwrap());
        assert!(matches!(c.require(["a", "zz"]), Err(ConfigError::MissingKey(_))));
    }

    #[test]
    fn test_string_leaves() {
        let c = config(json!({"system": {"wrk": "/w", "bin": {"dir": "/b"}, "n": 1}}));
        let leaves = c.string_leaves("system");
        assert_eq!(
            leaves,
            vec![("bin.dir".to_string(), "/b".to_string()), ("wrk".to_string(), "/w".to_string())]
        );
    }
}
