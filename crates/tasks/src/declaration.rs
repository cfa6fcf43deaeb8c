//! Static declarations: scope, predecessors and required keys of a kind.

use surfexp_core::TaskKind;

/// How often a kind is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Once per experiment, at the begin cycle, without member
    Once,
    /// Once per cycle and member
    PerCycle,
}

/// Which cycle a predecessor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOffset {
    /// The dependent's own cycle
    Same,
    /// The cycle before the dependent's
    Previous,
}

/// Whether a predecessor must be part of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Disabling the predecessor while the dependent is enabled is an error
    Required,
    /// Edge only wired when the predecessor kind is enabled
    IfEnabled,
}

/// One declared predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predecessor {
    /// Predecessor kind
    pub kind: TaskKind,
    /// Cycle of the predecessor
    pub offset: CycleOffset,
    /// Required or optional
    pub requirement: Requirement,
}

impl Predecessor {
    /// Same-cycle, required.
    pub fn required(kind: TaskKind) -> Self {
        Self {
            kind,
            offset: CycleOffset::Same,
            requirement: Requirement::Required,
        }
    }

    /// Same-cycle, only when enabled.
    pub fn if_enabled(kind: TaskKind) -> Self {
        Self {
            kind,
            offset: CycleOffset::Same,
            requirement: Requirement::IfEnabled,
        }
    }

    /// Move the predecessor to the previous cycle.
    pub fn previous_cycle(mut self) -> Self {
        self.offset = CycleOffset::Previous;
        self
    }
}

/// What a task kind declares about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDeclaration {
    /// Kind
    pub kind: TaskKind,
    /// Instantiation scope
    pub scope: Scope,
    /// Predecessor kinds
    pub predecessors: Vec<Predecessor>,
    /// Configuration keys that must be defined
    pub required_keys: Vec<String>,
    /// Named path templates the kind resolves
    pub paths: Vec<&'static str>,
    /// Dropped from the pipeline when no observation source is configured
    pub needs_observations: bool,
}

impl TaskDeclaration {
    /// Per-cycle declaration without predecessors.
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            scope: Scope::PerCycle,
            predecessors: Vec::new(),
            required_keys: Vec::new(),
            paths: Vec::new(),
            needs_observations: false,
        }
    }

    /// Instantiate once per experiment.
    pub fn once(mut self) -> Self {
        self.scope = Scope::Once;
        self
    }

    /// Add a predecessor.
    pub fn after(mut self, predecessor: Predecessor) -> Self {
        self.predecessors.push(predecessor);
        self
    }

    /// Add required configuration keys.
    pub fn requires<'a>(mut self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        self.required_keys.extend(keys.into_iter().map(str::to_string));
        self
    }

    /// Add named path templates.
    pub fn paths(mut self, paths: &[&'static str]) -> Self {
        self.paths.extend_from_slice(paths);
        self
    }

    /// Mark as an observation-driven kind.
    pub fn observational(mut self) -> Self {
        self.needs_observations = true;
        self
    }
}
