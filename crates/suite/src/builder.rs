//! Expands a resolved configuration and the cycle state into a suite.

use crate::error::{Result, SuiteBuildError};
use crate::pipeline::Pipeline;
use chrono::Duration;
use std::collections::BTreeMap;
use surfexp_config::{ConfigStore, PathResolver, ResolvedConfig};
use surfexp_core::{compact_dtg, format_dtg, CycleState, Dtg, MemberId, NodeId, SuiteDefinition, TaskNode};
use surfexp_tasks::{CycleOffset, Scope, TaskContext, TaskDeclaration, TaskRegistry};
use tracing::{debug, info};

/// Key holding the experiment name.
pub const CASE_KEY: &str = "general.case";
/// Key holding the cycle length.
pub const CYCLE_LENGTH_KEY: &str = "general.times.cycle_length";
/// Key holding the number of cycles covered by one build.
pub const CYCLES_AHEAD_KEY: &str = "suite_control.cycles_ahead";

/// Family of the once-per-experiment nodes.
pub const STATIC_FAMILY: &str = "Static";

/// Builds suites from configuration, progress and the task registry.
///
/// Edges come from the declarations of the registered kinds; the builder
/// knows nothing about individual stages.
pub struct SuiteBuilder<'a> {
    store: &'a ConfigStore,
    registry: &'a TaskRegistry,
}

/// Configuration view and paths of one member.
struct MemberView {
    config: ResolvedConfig,
    paths: PathResolver,
}

impl<'a> SuiteBuilder<'a> {
    /// Create a builder.
    pub fn new(store: &'a ConfigStore, registry: &'a TaskRegistry) -> Self {
        Self { store, registry }
    }

    /// Build the suite for the active cycle window.
    ///
    /// An empty `members` slice means a deterministic run (`[None]`).
    pub fn build(
        &self,
        config: &ResolvedConfig,
        progress: &CycleState,
        members: &[Option<MemberId>],
    ) -> Result<SuiteDefinition> {
        let name = config.get_str(CASE_KEY)?;
        self.append(&SuiteDefinition::new(name), config, progress, members)
    }

    /// Append the nodes of the active cycle window to `existing`.
    ///
    /// Nodes already present are kept as they are, so appending the same
    /// window twice yields the same graph. `existing` is never modified; the
    /// extended suite is returned only when the whole window was built.
    pub fn append(
        &self,
        existing: &SuiteDefinition,
        config: &ResolvedConfig,
        progress: &CycleState,
        members: &[Option<MemberId>],
    ) -> Result<SuiteDefinition> {
        let pipeline = Pipeline::resolve(config, self.registry)?;
        let cycle_length = config.get_duration(CYCLE_LENGTH_KEY)?;
        let ahead = config.get_opt::<usize>(CYCLES_AHEAD_KEY)?.unwrap_or(1).max(1);
        let cycles = progress.window(cycle_length, ahead);
        if cycles.is_empty() {
            return Err(SuiteBuildError::ExperimentCompleted(format_dtg(&progress.end)));
        }

        let members: Vec<Option<MemberId>> = if members.is_empty() {
            vec![None]
        } else {
            members.to_vec()
        };
        let views = self.member_views(config, &pipeline, &members)?;

        let mut suite = existing.clone();
        let before = suite.nodes.len();
        let emitter = Emitter {
            pipeline: &pipeline,
            progress,
            cycle_length,
        };
        for cycle in &cycles {
            for member in &members {
                for kind in pipeline.kinds() {
                    let Some(declaration) = pipeline.declaration(*kind) else {
                        continue;
                    };
                    let (view_member, node_member) = match declaration.scope {
                        Scope::Once => (None, None),
                        Scope::PerCycle => (*member, *member),
                    };
                    let view = views.get(&view_member).or_else(|| views.get(&None));
                    let Some(view) = view else {
                        continue;
                    };
                    emitter.emit(&mut suite, declaration, *cycle, node_member, view)?;
                }
            }
        }

        info!(
            "Suite {}: {} new nodes for {} cycle(s) and {} member(s)",
            suite.name,
            suite.nodes.len() - before,
            cycles.len(),
            members.len()
        );
        Ok(suite)
    }

    /// Resolve every member's configuration and check the keys the enabled
    /// kinds require before any node is emitted.
    fn member_views(
        &self,
        config: &ResolvedConfig,
        pipeline: &Pipeline,
        members: &[Option<MemberId>],
    ) -> Result<BTreeMap<Option<MemberId>, MemberView>> {
        let mut views = BTreeMap::new();
        let base = MemberView {
            config: config.clone(),
            paths: self.store.path_resolver(config)?,
        };
        for kind in pipeline.kinds() {
            if let Some(declaration) = pipeline.declaration(*kind) {
                if declaration.scope == Scope::Once {
                    require_keys(&base.config, declaration)?;
                }
            }
        }
        views.insert(None, base);

        for member in members.iter().flatten() {
            let resolved = self.store.resolve_member(config, *member);
            for kind in pipeline.kinds() {
                if let Some(declaration) = pipeline.declaration(*kind) {
                    if declaration.scope == Scope::PerCycle {
                        require_keys(&resolved, declaration)?;
                    }
                }
            }
            let paths = self.store.path_resolver(&resolved)?;
            views.insert(Some(*member), MemberView { config: resolved, paths });
        }
        if members.contains(&None) {
            if let Some(base) = views.get(&None) {
                for kind in pipeline.kinds() {
                    if let Some(declaration) = pipeline.declaration(*kind) {
                        require_keys(&base.config, declaration)?;
                    }
                }
            }
        }
        Ok(views)
    }
}

fn require_keys(config: &ResolvedConfig, declaration: &TaskDeclaration) -> Result<()> {
    config.require(declaration.required_keys.iter().map(String::as_str))?;
    Ok(())
}

struct Emitter<'p> {
    pipeline: &'p Pipeline,
    progress: &'p CycleState,
    cycle_length: Duration,
}

impl Emitter<'_> {
    fn node_id(&self, declaration: &TaskDeclaration, cycle: Dtg, member: Option<MemberId>) -> NodeId {
        match declaration.scope {
            Scope::Once => NodeId::new(declaration.kind, self.progress.begin, None),
            Scope::PerCycle => NodeId::new(declaration.kind, cycle, member),
        }
    }

    fn emit(
        &self,
        suite: &mut SuiteDefinition,
        declaration: &TaskDeclaration,
        cycle: Dtg,
        member: Option<MemberId>,
        view: &MemberView,
    ) -> Result<()> {
        let id = self.node_id(declaration, cycle, member);
        if suite.contains(&id) {
            return Ok(());
        }

        let mut predecessors = Vec::new();
        for predecessor in &declaration.predecessors {
            let Some(pred_declaration) = self.pipeline.declaration(predecessor.kind) else {
                continue;
            };
            let pred_cycle = match predecessor.offset {
                CycleOffset::Same => cycle,
                CycleOffset::Previous => cycle - self.cycle_length,
            };
            let pred_id = self.node_id(pred_declaration, pred_cycle, member);
            if predecessor.offset == CycleOffset::Previous && !suite.contains(&pred_id) {
                debug!("{}: no previous-cycle node {}", id, pred_id);
                continue;
            }
            if !predecessors.contains(&pred_id) {
                predecessors.push(pred_id);
            }
        }

        let ctx = TaskContext::new(view.config.clone(), view.paths.clone(), *self.progress, id)?;
        let mut node = TaskNode::new(id);
        node.parameters.insert("basetime".to_string(), format_dtg(&id.cycle));
        if let Some(member) = id.member {
            node.parameters.insert("member".to_string(), member.0.to_string());
        }
        for name in &declaration.paths {
            node.parameters
                .insert((*name).to_string(), ctx.path(name)?.display().to_string());
        }
        node.predecessors = predecessors;

        debug!("Emitting {} after {:?}", id, node.predecessors);
        suite.insert(node)?;
        let family = family_path(&suite.name, &id, declaration.scope);
        suite.add_to_family(&family, id);
        Ok(())
    }
}

/// Family of a node: `/exp/Static` or `/exp/YYYYMMDD/HHMM[/mbrNNN]`.
pub fn family_path(experiment: &str, id: &NodeId, scope: Scope) -> String {
    if scope == Scope::Once {
        return format!("/{}/{}", experiment, STATIC_FAMILY);
    }
    let stamp = compact_dtg(&id.cycle);
    let (day, time) = stamp.split_at(8);
    match id.member {
        Some(member) => format!("/{}/{}/{}/{}", experiment, day, time, member),
        None => format!("/{}/{}/{}", experiment, day, time),
    }
}
