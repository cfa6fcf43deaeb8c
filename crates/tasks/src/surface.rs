//! The task contract and the closed set of surface stages.

use crate::assimilation::{FirstGuessTask, Oi2sodaTask, OptimalInterpolationTask, Qc2obsmonTask, QualityControlTask};
use crate::context::TaskContext;
use crate::cycling::{ForcingTask, ForecastTask, PerturbedRunTask, PrepTask, PrepareCycleTask, SodaTask};
use crate::declaration::TaskDeclaration;
use crate::error::{ExecutionResult, TaskError};
use crate::prepared::{self, PreparedTask};
use crate::static_fields::{CompileOfflineTask, PgdTask};
use async_trait::async_trait;
use surfexp_core::TaskKind;
use surfexp_tools::CommandRunner;

/// One pipeline stage.
///
/// `prepare` is pure with respect to the file system apart from reading it:
/// it resolves what to run and fails fast on configuration problems.
/// `execute` performs the work. `postfix` runs after `execute` whatever its
/// outcome.
#[async_trait]
pub trait Task: Send + Sync {
    /// Kind implemented by this stage
    fn kind(&self) -> TaskKind;

    /// Static declaration of the kind
    fn declaration(&self) -> TaskDeclaration;

    /// Resolve everything needed to run one node
    fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError>;

    /// Run a prepared node
    async fn execute(&self, prepared: &PreparedTask, runner: &dyn CommandRunner) -> ExecutionResult {
        prepared::execute_steps(prepared, runner).await
    }

    /// Clean up after a run
    async fn postfix(&self, prepared: &PreparedTask, _result: &ExecutionResult) -> Result<(), TaskError> {
        prepared::archive_logs(prepared).await
    }
}

/// The stages of a surface experiment.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceTask {
    /// Build the offline binaries
    CompileOffline(CompileOfflineTask),
    /// Static physiography
    Pgd(PgdTask),
    /// Clean the cycle work directory
    PrepareCycle(PrepareCycleTask),
    /// Initial state
    Prep(PrepTask),
    /// Atmospheric forcing
    Forcing(ForcingTask),
    /// Offline forecast
    Forecast(ForecastTask),
    /// Perturbed offline runs
    PerturbedRun(PerturbedRunTask),
    /// First guess extraction
    FirstGuess(FirstGuessTask),
    /// Observation quality control
    QualityControl(QualityControlTask),
    /// Optimal interpolation
    OptimalInterpolation(OptimalInterpolationTask),
    /// Analysis conversion for SODA
    Oi2soda(Oi2sodaTask),
    /// Surface data assimilation
    Soda(SodaTask),
    /// Monitoring database conversion
    Qc2obsmon(Qc2obsmonTask),
}

impl SurfaceTask {
    /// Default stage implementing `kind`.
    pub fn for_kind(kind: TaskKind) -> Self {
        match kind {
            TaskKind::CompileOffline => Self::CompileOffline(CompileOfflineTask::default()),
            TaskKind::Pgd => Self::Pgd(PgdTask::default()),
            TaskKind::PrepareCycle => Self::PrepareCycle(PrepareCycleTask),
            TaskKind::Prep => Self::Prep(PrepTask::default()),
            TaskKind::Forcing => Self::Forcing(ForcingTask),
            TaskKind::Forecast => Self::Forecast(ForecastTask::default()),
            TaskKind::PerturbedRun => Self::PerturbedRun(PerturbedRunTask::default()),
            TaskKind::FirstGuess => Self::FirstGuess(FirstGuessTask),
            TaskKind::QualityControl => Self::QualityControl(QualityControlTask),
            TaskKind::OptimalInterpolation => Self::OptimalInterpolation(OptimalInterpolationTask::default()),
            TaskKind::Oi2soda => Self::Oi2soda(Oi2sodaTask),
            TaskKind::Soda => Self::Soda(SodaTask::default()),
            TaskKind::Qc2obsmon => Self::Qc2obsmon(Qc2obsmonTask),
        }
    }
}

#[async_trait]
impl Task for SurfaceTask {
    fn kind(&self) -> TaskKind {
        match self {
            Self::CompileOffline(_) => TaskKind::CompileOffline,
            Self::Pgd(_) => TaskKind::Pgd,
            Self::PrepareCycle(_) => TaskKind::PrepareCycle,
            Self::Prep(_) => TaskKind::Prep,
            Self::Forcing(_) => TaskKind::Forcing,
            Self::Forecast(_) => TaskKind::Forecast,
            Self::PerturbedRun(_) => TaskKind::PerturbedRun,
            Self::FirstGuess(_) => TaskKind::FirstGuess,
            Self::QualityControl(_) => TaskKind::QualityControl,
            Self::OptimalInterpolation(_) => TaskKind::OptimalInterpolation,
            Self::Oi2soda(_) => TaskKind::Oi2soda,
            Self::Soda(_) => TaskKind::Soda,
            Self::Qc2obsmon(_) => TaskKind::Qc2obsmon,
        }
    }

    fn declaration(&self) -> TaskDeclaration {
        match self {
            Self::CompileOffline(_) => CompileOfflineTask::declaration(),
            Self::Pgd(_) => PgdTask::declaration(),
            Self::PrepareCycle(_) => PrepareCycleTask::declaration(),
            Self::Prep(_) => PrepTask::declaration(),
            Self::Forcing(_) => ForcingTask::declaration(),
            Self::Forecast(_) => ForecastTask::declaration(),
            Self::PerturbedRun(_) => PerturbedRunTask::declaration(),
            Self::FirstGuess(_) => FirstGuessTask::declaration(),
            Self::QualityControl(_) => QualityControlTask::declaration(),
            Self::OptimalInterpolation(_) => OptimalInterpolationTask::declaration(),
            Self::Oi2soda(_) => Oi2sodaTask::declaration(),
            Self::Soda(_) => SodaTask::declaration(),
            Self::Qc2obsmon(_) => Qc2obsmonTask::declaration(),
        }
    }

    fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        match self {
            Self::CompileOffline(t) => t.prepare(ctx),
            Self::Pgd(t) => t.prepare(ctx),
            Self::PrepareCycle(t) => t.prepare(ctx),
            Self::Prep(t) => t.prepare(ctx),
            Self::Forcing(t) => t.prepare(ctx),
            Self::Forecast(t) => t.prepare(ctx),
            Self::PerturbedRun(t) => t.prepare(ctx),
            Self::FirstGuess(t) => t.prepare(ctx),
            Self::QualityControl(t) => t.prepare(ctx),
            Self::OptimalInterpolation(t) => t.prepare(ctx),
            Self::Oi2soda(t) => t.prepare(ctx),
            Self::Soda(t) => t.prepare(ctx),
            Self::Qc2obsmon(t) => t.prepare(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations_match_kinds() {
        for kind in TaskKind::ALL {
            let task = SurfaceTask::for_kind(kind);
            assert_eq!(task.kind(), kind);
            assert_eq!(task.declaration().kind, kind);
        }
    }

    #[test]
    fn test_no_kind_depends_on_itself() {
        for kind in TaskKind::ALL {
            let declaration = SurfaceTask::for_kind(kind).declaration();
            assert!(declaration
                .predecessors
                .iter()
                .all(|p| p.kind != kind || p.offset == crate::CycleOffset::Previous));
        }
    }
}
