//! The explicit execution context handed to every task.

use crate::geometry::Geometry;
use chrono::Duration;
use std::path::PathBuf;
use surfexp_config::{Bindings, ConfigError, ConfigStore, MissingKeyError, PathResolver, ResolvedConfig, Result};
use surfexp_core::{CycleState, Dtg, MemberId, NodeId, TaskKind};

/// Everything one task instance sees: the resolved configuration view of its
/// member, the cycle state, its node identity, the domain and the paths of
/// the host.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Experiment name
    pub experiment: String,
    /// Member-resolved configuration
    pub config: ResolvedConfig,
    /// Cycle state at build time
    pub progress: CycleState,
    /// Node being run
    pub node: NodeId,
    geometry: Option<Geometry>,
    paths: PathResolver,
    ensemble_mode: bool,
}

impl TaskContext {
    /// Build a context. The domain is read when `domain` is configured.
    pub fn new(
        config: ResolvedConfig,
        paths: PathResolver,
        progress: CycleState,
        node: NodeId,
    ) -> Result<Self> {
        let experiment = config.get_str("general.case")?.to_string();
        let geometry = if config.contains("domain") {
            Some(Geometry::from_config(&config)?)
        } else {
            None
        };
        let ensemble_mode = ConfigStore::ensemble_mode(&config)?;
        Ok(Self {
            experiment,
            config,
            progress,
            node,
            geometry,
            paths,
            ensemble_mode,
        })
    }

    /// Kind of the node.
    pub fn kind(&self) -> TaskKind {
        self.node.kind
    }

    /// Cycle of the node.
    pub fn cycle(&self) -> Dtg {
        self.node.cycle
    }

    /// Member of the node.
    pub fn member(&self) -> Option<MemberId> {
        self.node.member
    }

    /// Domain descriptor.
    pub fn geometry(&self) -> Result<&Geometry> {
        self.geometry.as_ref().ok_or_else(|| {
            ConfigError::MissingKey(MissingKeyError {
                key: Geometry::REQUIRED_KEYS[0].to_string(),
            })
        })
    }

    /// Path resolver of the host.
    pub fn resolver(&self) -> &PathResolver {
        &self.paths
    }

    /// Template bindings for any cycle of this node's member.
    pub fn bindings_for(&self, cycle: &Dtg) -> Bindings {
        Bindings::new()
            .experiment(&self.experiment)
            .cycle(cycle)
            .member(self.member(), self.ensemble_mode)
    }

    /// Template bindings for the node's cycle.
    pub fn bindings(&self) -> Bindings {
        self.bindings_for(&self.cycle())
    }

    /// Resolve a named path template for the node's cycle.
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        self.paths.resolve_named(name, &self.bindings())
    }

    /// Resolve a named path template for another cycle.
    pub fn path_at(&self, name: &str, cycle: &Dtg) -> Result<PathBuf> {
        self.paths.resolve_named(name, &self.bindings_for(cycle))
    }

    /// Whether a named template exists.
    pub fn has_path(&self, name: &str) -> bool {
        self.paths.template(name).is_some()
    }

    /// Working directory of this node.
    pub fn workdir(&self) -> Result<PathBuf> {
        Ok(self.path("wrk")?.join(self.kind().as_str()))
    }

    /// Cycle length.
    pub fn cycle_length(&self) -> Result<Duration> {
        self.config.get_duration("general.times.cycle_length")
    }

    /// The cycle before this one.
    pub fn previous_cycle(&self) -> Result<Dtg> {
        Ok(self.cycle() - self.cycle_length()?)
    }

    /// Whether the node belongs to the experiment's first cycle.
    pub fn is_first_cycle(&self) -> bool {
        self.cycle() <= self.progress.begin
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::{json, Value};
    use surfexp_config::{merge, ConfigLayer};
    use surfexp_core::parse_dtg;

    /// Context over a temporary root with a small domain.
    pub(crate) fn context(root: &std::path::Path, node: NodeId, extra: Value) -> TaskContext {
        let r = root.display().to_string();
        let base = json!({
            "general": {"case": "demo", "times": {"cycle_length": "PT3H"}},
            "domain": crate::geometry::tests::domain(),
            "system": {
                "wrk": format!("{r}/wrk/@YYYY@@MM@@DD@_@HH@/@EEE@"),
                "archive_dir": format!("{r}/archive/@YYYY@/@MM@/@DD@/@HH@/@EEE@"),
                "climdir": format!("{r}/climate"),
                "forcing_dir": format!("{r}/forcing/@YYYY@@MM@@DD@@HH@/@EEE@"),
                "obs_dir": format!("{r}/obs/@YYYY@@MM@@DD@"),
                "bindir": format!("{r}/bin"),
                "casedir": format!("{r}/case")
            }
        });
        let config = merge(&[
            ConfigLayer::new("base", base).unwrap(),
            ConfigLayer::new("extra", extra).unwrap(),
        ]);
        let paths = PathResolver::new(None).with_system_paths(&config);
        let progress = CycleState::new(parse_dtg("2022020100").unwrap(), parse_dtg("2022020200").unwrap());
        TaskContext::new(config, paths, progress, node).unwrap()
    }

    #[test]
    fn test_paths_follow_cycle_and_member() {
        let dir = tempfile::tempdir().unwrap();
        let node = NodeId::new(TaskKind::Forecast, parse_dtg("2022020103").unwrap(), Some(MemberId(1)));
        let ctx = context(dir.path(), node, json!({}));
        assert!(ctx.workdir().unwrap().ends_with("wrk/20220201_03/mbr001/forecast"));
        assert_eq!(ctx.previous_cycle().unwrap(), parse_dtg("2022020100").unwrap());
        assert!(ctx.path_at("archive_dir", &ctx.previous_cycle().unwrap())
            .unwrap()
            .ends_with("archive/2022/02/01/00/mbr001"));
        assert!(!ctx.is_first_cycle());
        assert_eq!(ctx.geometry().unwrap().nimax, 60);
    }
}
