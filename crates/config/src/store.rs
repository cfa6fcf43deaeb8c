//! The configuration store: ordered layers, member layers and host profiles.

use crate::error::{ConfigError, Result};
use crate::host::HostProfile;
use crate::layer::{deep_update, merge, ConfigLayer};
use crate::paths::PathResolver;
use crate::resolved::ResolvedConfig;
use std::collections::BTreeMap;
use std::path::Path;
use surfexp_core::MemberId;
use tracing::{debug, info};

/// Key holding the host profile tag.
pub const HOST_KEY: &str = "system.host";
/// Key holding the ensemble member list.
pub const MEMBERS_KEY: &str = "ensemble.members";
/// Key enabling ensemble naming for the control member.
pub const ENSEMBLE_KEY: &str = "ensemble.enabled";
/// Inline per-member overrides, keyed by member number.
pub const MEMBER_SETTINGS_KEY: &str = "ensemble.member_settings";

/// Owns the configuration layers and host profiles of one experiment.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    layers: Vec<ConfigLayer>,
    member_layers: BTreeMap<MemberId, ConfigLayer>,
    hosts: BTreeMap<String, HostProfile>,
}

impl ConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load layers from files, in order.
    pub async fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut store = Self::new();
        for path in paths {
            store.push_layer(ConfigLayer::load(path).await?);
        }
        Ok(store)
    }

    /// Append a layer; it overrides all earlier ones.
    pub fn push_layer(&mut self, layer: ConfigLayer) {
        debug!("Adding configuration layer {}", layer.name);
        self.layers.push(layer);
    }

    /// Builder form of [`ConfigStore::push_layer`].
    pub fn with_layer(mut self, layer: ConfigLayer) -> Self {
        self.push_layer(layer);
        self
    }

    /// Set the override layer of one member.
    pub fn set_member_layer(&mut self, member: MemberId, layer: ConfigLayer) {
        self.member_layers.insert(member, layer);
    }

    /// Register a host profile under its name.
    pub fn register_host(&mut self, host: HostProfile) {
        debug!("Registering host profile {}", host.name);
        self.hosts.insert(host.name.clone(), host);
    }

    /// Look up a host profile by tag.
    pub fn host(&self, tag: &str) -> Result<&HostProfile> {
        self.hosts
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownHost(tag.to_string()))
    }

    /// The layers in merge order.
    pub fn layers(&self) -> &[ConfigLayer] {
        &self.layers
    }

    /// Merge the experiment-wide layers.
    pub fn merge(&self) -> ResolvedConfig {
        let resolved = merge(&self.layers);
        info!("Merged {} configuration layers", self.layers.len());
        resolved
    }

    /// Apply the member specific settings on top of `base`.
    ///
    /// Inline `ensemble.member_settings.<n>` entries are applied first, then
    /// a registered member layer.
    pub fn resolve_member(&self, base: &ResolvedConfig, member: MemberId) -> ResolvedConfig {
        let mut value = base.as_value().clone();
        let inline = base
            .find(&format!("{}.{}", MEMBER_SETTINGS_KEY, member.0))
            .cloned();
        if let Some(settings) = inline {
            deep_update(&mut value, &settings);
        }
        if let Some(layer) = self.member_layers.get(&member) {
            debug!("Applying member layer {} for {}", layer.name, member);
            deep_update(&mut value, layer.values());
        }
        ResolvedConfig::for_member(value, member)
    }

    /// Configured members; `[None]` for a deterministic run.
    pub fn members(config: &ResolvedConfig) -> Result<Vec<Option<MemberId>>> {
        let members: Option<Vec<u32>> = config.get_opt(MEMBERS_KEY)?;
        Ok(match members {
            Some(list) if !list.is_empty() => {
                let mut ids: Vec<MemberId> = list.into_iter().map(MemberId).collect();
                ids.sort();
                ids.dedup();
                ids.into_iter().map(Some).collect()
            }
            _ => vec![None],
        })
    }

    /// Whether ensemble naming is used for every member, including the control.
    pub fn ensemble_mode(config: &ResolvedConfig) -> Result<bool> {
        config.get_bool_or(ENSEMBLE_KEY, false)
    }

    /// Host profile selected by `system.host`, if any.
    pub fn host_for(&self, config: &ResolvedConfig) -> Result<Option<&HostProfile>> {
        match config.get_opt::<String>(HOST_KEY)? {
            Some(tag) => self.host(&tag).map(Some),
            None => Ok(None),
        }
    }

    /// Path resolver for the selected host plus configured `system.*` paths.
    pub fn path_resolver(&self, config: &ResolvedConfig) -> Result<PathResolver> {
        Ok(PathResolver::new(self.host_for(config)?).with_system_paths(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Bindings;
    use serde_json::json;

    fn store() -> ConfigStore {
        let mut store = ConfigStore::new()
            .with_layer(ConfigLayer::new("defaults", json!({
                "general": {"case": "demo", "times": {"cycle_length": "PT3H"}},
                "forecast": {"args": {"pert": 0}}
            })).unwrap())
            .with_layer(ConfigLayer::new("user", json!({
                "ensemble.members": [1, 0, 1],
                "ensemble.member_settings.1": {"forecast": {"args": {"pert": 1}}},
                "system.host": "test"
            })).unwrap());
        store.set_member_layer(
            MemberId(0),
            ConfigLayer::new("mbr000", json!({"forecast.args.pert": 7})).unwrap(),
        );
        store.register_host(HostProfile::new("test").with_path("wrk", "/w/@EXP@/@EEE@"));
        store
    }

    #[test]
    fn test_members_sorted_and_unique() {
        let base = store().merge();
        assert_eq!(
            ConfigStore::members(&base).unwrap(),
            vec![Some(MemberId(0)), Some(MemberId(1))]
        );
        let plain = ConfigStore::new().merge();
        assert_eq!(ConfigStore::members(&plain).unwrap(), vec![None]);
    }

    #[test]
    fn test_member_layers_only_affect_their_member() {
        let store = store();
        let base = store.merge();
        let m0 = store.resolve_member(&base, MemberId(0));
        let m1 = store.resolve_member(&base, MemberId(1));
        let m2 = store.resolve_member(&base, MemberId(2));
        assert_eq!(m0.get("forecast.args.pert").unwrap(), &json!(7));
        assert_eq!(m1.get("forecast.args.pert").unwrap(), &json!(1));
        assert_eq!(m2.get("forecast.args.pert").unwrap(), &json!(0));
        assert_eq!(base.get("forecast.args.pert").unwrap(), &json!(0));
        assert_eq!(m1.member(), Some(MemberId(1)));
    }

    #[test]
    fn test_host_lookup() {
        let store = store();
        let base = store.merge();
        assert!(matches!(store.host("nope"), Err(ConfigError::UnknownHost(_))));
        let resolver = store.path_resolver(&base).unwrap();
        let path = resolver
            .resolve_named("wrk", &Bindings::new().experiment("demo").member(Some(MemberId(1)), false))
            .unwrap();
        assert_eq!(path, std::path::PathBuf::from("/w/demo/mbr001"));
    }
}
