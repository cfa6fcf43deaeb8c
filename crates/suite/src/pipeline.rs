//! Enabled task kinds of an experiment and their order.

use crate::error::{Result, SuiteBuildError};
use std::collections::{BTreeMap, BTreeSet};
use surfexp_config::ResolvedConfig;
use surfexp_core::TaskKind;
use surfexp_tasks::{CycleOffset, Requirement, TaskDeclaration, TaskRegistry};
use tracing::{debug, info};

/// Key listing the enabled kinds.
pub const PIPELINE_KEY: &str = "suite_control.pipeline";
/// Key listing the observation sources.
pub const OBSERVATION_SOURCES_KEY: &str = "observations.sources";

/// Kinds enabled when no pipeline is configured.
pub const DEFAULT_PIPELINE: [TaskKind; 9] = [
    TaskKind::Pgd,
    TaskKind::Prep,
    TaskKind::Forcing,
    TaskKind::FirstGuess,
    TaskKind::QualityControl,
    TaskKind::OptimalInterpolation,
    TaskKind::Oi2soda,
    TaskKind::Soda,
    TaskKind::Forecast,
];

/// The enabled kinds with their declarations, ordered so that every
/// same-cycle predecessor comes before its dependents.
#[derive(Debug, Clone)]
pub struct Pipeline {
    order: Vec<TaskKind>,
    declarations: BTreeMap<TaskKind, TaskDeclaration>,
}

impl Pipeline {
    /// Resolve the pipeline of a configuration.
    ///
    /// Observation-driven kinds are dropped when no observation source is
    /// configured. A required predecessor that is not enabled fails the build.
    pub fn resolve(config: &ResolvedConfig, registry: &TaskRegistry) -> Result<Self> {
        let configured: Option<Vec<String>> = config.get_opt(PIPELINE_KEY)?;
        let mut kinds: BTreeSet<TaskKind> = match configured {
            Some(names) => names
                .iter()
                .map(|name| name.parse().map_err(|_| SuiteBuildError::UnknownKind(name.clone())))
                .collect::<Result<_>>()?,
            None => DEFAULT_PIPELINE.into_iter().collect(),
        };

        let mut declarations = BTreeMap::new();
        for kind in &kinds {
            declarations.insert(*kind, registry.declaration(*kind)?);
        }

        let has_observations = !config.get_str_list(OBSERVATION_SOURCES_KEY)?.is_empty();
        if !has_observations {
            let dropped: Vec<TaskKind> = declarations
                .values()
                .filter(|d| d.needs_observations)
                .map(|d| d.kind)
                .collect();
            if !dropped.is_empty() {
                info!("No observation sources configured, disabling {:?}", dropped);
            }
            for kind in dropped {
                kinds.remove(&kind);
                declarations.remove(&kind);
            }
        }

        for declaration in declarations.values() {
            for predecessor in &declaration.predecessors {
                if predecessor.requirement == Requirement::Required && !kinds.contains(&predecessor.kind) {
                    return Err(SuiteBuildError::DisabledPredecessor {
                        kind: declaration.kind,
                        predecessor: predecessor.kind,
                    });
                }
            }
        }

        let order = order_kinds(&declarations)?;
        debug!("Pipeline order: {:?}", order);
        Ok(Self { order, declarations })
    }

    /// Enabled kinds in dependency order.
    pub fn kinds(&self) -> &[TaskKind] {
        &self.order
    }

    /// Whether a kind is enabled.
    pub fn is_enabled(&self, kind: TaskKind) -> bool {
        self.declarations.contains_key(&kind)
    }

    /// Declaration of an enabled kind.
    pub fn declaration(&self, kind: TaskKind) -> Option<&TaskDeclaration> {
        self.declarations.get(&kind)
    }
}

/// Order kinds by their same-cycle edges, taking the first ready kind in
/// `TaskKind` order at each step.
fn order_kinds(declarations: &BTreeMap<TaskKind, TaskDeclaration>) -> Result<Vec<TaskKind>> {
    let mut waiting: BTreeMap<TaskKind, BTreeSet<TaskKind>> = declarations
        .values()
        .map(|d| {
            let preds = d
                .predecessors
                .iter()
                .filter(|p| p.offset == CycleOffset::Same && declarations.contains_key(&p.kind))
                .map(|p| p.kind)
                .collect();
            (d.kind, preds)
        })
        .collect();

    let mut order = Vec::with_capacity(waiting.len());
    while !waiting.is_empty() {
        let Some(kind) = waiting
            .iter()
            .find(|(_, preds)| preds.is_empty())
            .map(|(kind, _)| *kind)
        else {
            return Err(SuiteBuildError::PipelineCycle(waiting.keys().copied().collect()));
        };
        waiting.remove(&kind);
        for preds in waiting.values_mut() {
            preds.remove(&kind);
        }
        order.push(kind);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use surfexp_config::{merge, ConfigLayer};

    fn config(values: serde_json::Value) -> ResolvedConfig {
        merge(&[ConfigLayer::new("test", values).unwrap()])
    }

    #[test]
    fn test_default_pipeline_without_observations() {
        let pipeline = Pipeline::resolve(&config(json!({})), &TaskRegistry::with_defaults()).unwrap();
        assert_eq!(
            pipeline.kinds(),
            &[TaskKind::Pgd, TaskKind::Prep, TaskKind::Forcing, TaskKind::Forecast]
        );
        assert!(!pipeline.is_enabled(TaskKind::Soda));
    }

    #[test]
    fn test_assimilation_order() {
        let pipeline = Pipeline::resolve(
            &config(json!({"observations": {"sources": ["synop"]}})),
            &TaskRegistry::with_defaults(),
        )
        .unwrap();
        let position = |k| pipeline.kinds().iter().position(|x| *x == k).unwrap();
        assert!(position(TaskKind::QualityControl) < position(TaskKind::OptimalInterpolation));
        assert!(position(TaskKind::Oi2soda) < position(TaskKind::Soda));
        assert!(position(TaskKind::Soda) < position(TaskKind::Forecast));
    }

    #[test]
    fn test_required_predecessor_disabled() {
        let err = Pipeline::resolve(
            &config(json!({"suite_control.pipeline": ["forcing", "forecast"]})),
            &TaskRegistry::with_defaults(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SuiteBuildError::DisabledPredecessor { kind: TaskKind::Forecast, predecessor: TaskKind::Prep }
        ));
    }

    #[test]
    fn test_unknown_kind() {
        let err = Pipeline::resolve(
            &config(json!({"suite_control.pipeline": ["prep", "coffee"]})),
            &TaskRegistry::with_defaults(),
        )
        .unwrap_err();
        assert!(matches!(err, SuiteBuildError::UnknownKind(name) if name == "coffee"));
    }
}
