//! Per-cycle model stages: cycle preparation, initial state, forcing,
//! forecast, perturbed runs and the SODA assimilation update.

use crate::binary::{
    append_extra_args, archive_file, basetime_arg, binary_argv, domain_step, driver_command,
    exp_file_paths_step, pgd_file, resolve_binary, DOMAIN_FILE,
};
use crate::context::TaskContext;
use crate::declaration::{Predecessor, TaskDeclaration};
use crate::error::TaskError;
use crate::geometry::Geometry;
use crate::prepared::{PreparedTask, Step};
use std::path::PathBuf;
use surfexp_core::TaskKind;
use tracing::info;

/// Removes the working directory of the cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareCycleTask;

impl PrepareCycleTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::PrepareCycle).paths(&["wrk"])
    }

    /// Resolve the clean-up for a node.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let wrk = ctx.path("wrk")?;
        Ok(PreparedTask::new(ctx.node, wrk.clone()).step(Step::RemoveDir(wrk)))
    }
}

/// Prepares the initial surface state of a cycle.
///
/// The first cycle runs the PREP binary; later cycles take over the forecast
/// of the previous cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepTask {
    /// Binary name
    pub binary: &'static str,
}

impl Default for PrepTask {
    fn default() -> Self {
        Self { binary: "PREP" }
    }
}

impl PrepTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::Prep)
            .after(Predecessor::if_enabled(TaskKind::PrepareCycle))
            .after(Predecessor::if_enabled(TaskKind::Pgd))
            .after(Predecessor::if_enabled(TaskKind::Forecast).previous_cycle())
            .requires(["general.times.cycle_length"])
            .paths(&["wrk", "archive_dir", "climdir"])
    }

    /// Resolve the initial state for a node.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let output = archive_file(ctx, "PREP")?;

        if !ctx.is_first_cycle() {
            let previous = ctx.path_at("archive_dir", &ctx.previous_cycle()?)?;
            let first_guess = previous.join(format!("SURFOUT{}", crate::binary::suffix(ctx)?));
            if !first_guess.exists() {
                return Err(TaskError::MissingInput(first_guess));
            }
            info!("Using {} as initial conditions", first_guess.display());
            return Ok(PreparedTask::new(ctx.node, workdir)
                .step(Step::Copy {
                    from: first_guess,
                    to: output.clone(),
                })
                .output(output));
        }

        let binary = resolve_binary(ctx, self.binary)?;
        let pgd = pgd_file(ctx)?;
        let mut argv = binary_argv(ctx, &binary)?;
        argv.extend([
            "--pgd".to_string(),
            pgd.display().to_string(),
            "--output".to_string(),
            output.display().to_string(),
        ]);
        append_extra_args(ctx, "prep.args", &mut argv)?;

        Ok(PreparedTask::new(ctx.node, workdir.clone())
            .input(pgd)
            .step(exp_file_paths_step(ctx, &workdir)?)
            .run(driver_command(ctx, "prep", argv)?)
            .output(output)
            .archive_logs(["OPTIONS.nam", "LISTING_PREP0.txt"], ctx.path("archive_dir")?))
    }
}

/// Generates atmospheric forcing for the cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForcingTask;

impl ForcingTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::Forcing)
            .after(Predecessor::if_enabled(TaskKind::PrepareCycle))
            .requires(["general.times.cycle_length"])
            .requires(Geometry::REQUIRED_KEYS)
            .paths(&["wrk", "forcing_dir"])
    }

    /// Resolve the forcing generation for a node.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let output = ctx.path("forcing_dir")?.join("FORCING.nc");
        let end = ctx.cycle() + ctx.cycle_length()?;

        let mut argv = vec![
            basetime_arg(&ctx.cycle()),
            basetime_arg(&end),
            "--domain".to_string(),
            DOMAIN_FILE.to_string(),
            "--output-format".to_string(),
            "netcdf".to_string(),
            "--of".to_string(),
            output.display().to_string(),
        ];
        append_extra_args(ctx, "forcing.args", &mut argv)?;

        Ok(PreparedTask::new(ctx.node, workdir.clone())
            .step(domain_step(ctx, &workdir)?)
            .run(driver_command(ctx, "create_forcing", argv)?)
            .output(output))
    }
}

/// Integrates the offline surface model over one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastTask {
    /// Binary name
    pub binary: &'static str,
}

impl Default for ForecastTask {
    fn default() -> Self {
        Self { binary: "OFFLINE" }
    }
}

impl ForecastTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::Forecast)
            .after(Predecessor::required(TaskKind::Prep))
            .after(Predecessor::if_enabled(TaskKind::Forcing))
            .after(Predecessor::if_enabled(TaskKind::Soda))
            .requires(["general.times.cycle_length"])
            .paths(&["wrk", "archive_dir", "climdir", "forcing_dir"])
    }

    /// Resolve the forecast for a node. Starts from the analysis when one
    /// exists, otherwise from the prepared state.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let binary = resolve_binary(ctx, self.binary)?;
        let analysis = archive_file(ctx, "ANALYSIS")?;
        let start = if analysis.exists() {
            analysis
        } else {
            archive_file(ctx, "PREP")?
        };
        let pgd = pgd_file(ctx)?;
        let output = archive_file(ctx, "SURFOUT")?;

        let mut argv = binary_argv(ctx, &binary)?;
        argv.extend([
            "--pgd".to_string(),
            pgd.display().to_string(),
            "--prep".to_string(),
            start.display().to_string(),
            "--forcing-dir".to_string(),
            ctx.path("forcing_dir")?.display().to_string(),
            "--output".to_string(),
            output.display().to_string(),
        ]);
        append_extra_args(ctx, "offline.args", &mut argv)?;
        if !argv.iter().any(|a| a == "--output-frequency") {
            argv.extend([
                "--output-frequency".to_string(),
                ctx.cycle_length()?.num_seconds().to_string(),
            ]);
        }

        Ok(PreparedTask::new(ctx.node, workdir.clone())
            .input(pgd)
            .input(start)
            .step(exp_file_paths_step(ctx, &workdir)?)
            .run(driver_command(ctx, "offline", argv)?)
            .output(output)
            .archive_logs(["OPTIONS.nam", "LISTING_OFFLINE0.txt"], ctx.path("archive_dir")?))
    }
}

/// Runs perturbed offline integrations for the assimilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerturbedRunTask {
    /// Binary name
    pub binary: &'static str,
    /// Perturbations unless `perturbed_run.perturbations` is set
    pub perturbations: u64,
}

impl Default for PerturbedRunTask {
    fn default() -> Self {
        Self {
            binary: "OFFLINE",
            perturbations: 1,
        }
    }
}

impl PerturbedRunTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::PerturbedRun)
            .after(Predecessor::required(TaskKind::Prep))
            .after(Predecessor::if_enabled(TaskKind::Forcing))
            .requires(["general.times.cycle_length"])
            .paths(&["wrk", "archive_dir", "climdir", "forcing_dir"])
    }

    /// Resolve one run per perturbation for a node.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let binary = resolve_binary(ctx, self.binary)?;
        let prep = archive_file(ctx, "PREP")?;
        let pgd = pgd_file(ctx)?;
        let count = ctx
            .config
            .get_u64_or("perturbed_run.perturbations", self.perturbations)?;

        let mut prepared = PreparedTask::new(ctx.node, workdir.clone())
            .input(pgd.clone())
            .input(prep.clone())
            .step(exp_file_paths_step(ctx, &workdir)?);
        for pert in 1..=count {
            let output: PathBuf = archive_file(ctx, &format!("SURFOUT_PERT{}", pert))?;
            let mut argv = binary_argv(ctx, &binary)?;
            argv.extend([
                "--pgd".to_string(),
                pgd.display().to_string(),
                "--prep".to_string(),
                prep.display().to_string(),
                "--forcing-dir".to_string(),
                ctx.path("forcing_dir")?.display().to_string(),
                "--pert".to_string(),
                pert.to_string(),
                "--output".to_string(),
                output.display().to_string(),
            ]);
            append_extra_args(ctx, "perturbed_run.args", &mut argv)?;
            prepared = prepared
                .run(driver_command(ctx, "perturbed_offline", argv)?)
                .output(output);
        }
        Ok(prepared)
    }
}

/// Surface data assimilation update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SodaTask {
    /// Binary name
    pub binary: &'static str,
}

impl Default for SodaTask {
    fn default() -> Self {
        Self { binary: "SODA" }
    }
}

impl SodaTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::Soda)
            .after(Predecessor::required(TaskKind::Prep))
            .after(Predecessor::required(TaskKind::QualityControl))
            .after(Predecessor::required(TaskKind::OptimalInterpolation))
            .after(Predecessor::if_enabled(TaskKind::Oi2soda))
            .after(Predecessor::if_enabled(TaskKind::PerturbedRun))
            .paths(&["wrk", "archive_dir", "climdir"])
            .observational()
    }

    /// Resolve the analysis for a node.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let binary = resolve_binary(ctx, self.binary)?;
        let prep = archive_file(ctx, "PREP")?;
        let pgd = pgd_file(ctx)?;
        let output = archive_file(ctx, "ANALYSIS")?;

        let mut argv = binary_argv(ctx, &binary)?;
        argv.extend([
            "--pgd".to_string(),
            pgd.display().to_string(),
            "--prep".to_string(),
            prep.display().to_string(),
            "--output".to_string(),
            output.display().to_string(),
        ]);
        let observations = crate::assimilation::soda_observation_file(ctx)?;
        if observations.exists() {
            argv.extend(["--obs".to_string(), observations.display().to_string()]);
        }
        append_extra_args(ctx, "soda.args", &mut argv)?;

        Ok(PreparedTask::new(ctx.node, workdir.clone())
            .input(pgd)
            .input(prep)
            .step(exp_file_paths_step(ctx, &workdir)?)
            .run(driver_command(ctx, "soda", argv)?)
            .output(output)
            .archive_logs(["OPTIONS.nam", "LISTING_SODA0.txt"], ctx.path("archive_dir")?))
    }
}
