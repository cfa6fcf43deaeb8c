//! Observation handling stages feeding the assimilation: first guess
//! extraction, quality control, optimal interpolation and the conversion
//! utilities around them.

use crate::binary::{append_extra_args, archive_file, basetime_arg, domain_step, driver_command, DOMAIN_FILE};
use crate::context::TaskContext;
use crate::declaration::{Predecessor, TaskDeclaration};
use crate::error::TaskError;
use crate::geometry::Geometry;
use crate::prepared::PreparedTask;
use std::path::PathBuf;
use surfexp_core::TaskKind;
use tracing::warn;

const DEFAULT_VARIABLES: [&str; 3] = ["t2m", "rh2m", "sd"];

/// Analysed variables (`observations.variables`).
pub fn variables(ctx: &TaskContext) -> Result<Vec<String>, TaskError> {
    let configured = ctx.config.get_str_list("observations.variables")?;
    if configured.is_empty() {
        Ok(DEFAULT_VARIABLES.map(String::from).to_vec())
    } else {
        Ok(configured)
    }
}

/// Field name of an analysed variable in the gridded files.
pub fn field_name(var: &str) -> Option<&'static str> {
    match var {
        "t2m" => Some("air_temperature_2m"),
        "rh2m" => Some("relative_humidity_2m"),
        "sd" => Some("surface_snow_thickness"),
        _ => None,
    }
}

fn raw_file(ctx: &TaskContext) -> Result<PathBuf, TaskError> {
    Ok(ctx.path("archive_dir")?.join("raw.nc"))
}

fn qc_file(ctx: &TaskContext, var: &str) -> Result<PathBuf, TaskError> {
    Ok(ctx.path("archive_dir")?.join(format!("qc_{}.json", var)))
}

fn analysis_file(ctx: &TaskContext, var: &str) -> Result<PathBuf, TaskError> {
    Ok(ctx.path("archive_dir")?.join(format!("an_{}.nc", var)))
}

/// Observation file read by SODA, `OBSERVATIONS_YYMMDDHH.DAT`.
pub fn soda_observation_file(ctx: &TaskContext) -> Result<PathBuf, TaskError> {
    let stamp = &basetime_arg(&ctx.cycle())[2..];
    Ok(ctx.path("archive_dir")?.join(format!("OBSERVATIONS_{}.DAT", stamp)))
}

/// Extracts the first guess fields at the observation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirstGuessTask;

impl FirstGuessTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::FirstGuess)
            .after(Predecessor::required(TaskKind::Prep))
            .requires(Geometry::REQUIRED_KEYS)
            .paths(&["wrk", "archive_dir"])
            .observational()
    }

    /// Resolve the extraction for a node.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let first_guess = archive_file(ctx, "PREP")?;
        let output = raw_file(ctx)?;

        let mut argv = vec![
            "--validtime".to_string(),
            basetime_arg(&ctx.cycle()),
            "--domain".to_string(),
            DOMAIN_FILE.to_string(),
            "--sfx-file".to_string(),
            first_guess.display().to_string(),
            "--output".to_string(),
            output.display().to_string(),
        ];
        for var in variables(ctx)? {
            match field_name(&var) {
                Some(field) => argv.push(field.to_string()),
                None => warn!("No field translation for {}, skipped", var),
            }
        }
        append_extra_args(ctx, "first_guess.args", &mut argv)?;

        Ok(PreparedTask::new(ctx.node, workdir.clone())
            .input(first_guess)
            .step(domain_step(ctx, &workdir)?)
            .run(driver_command(ctx, "FirstGuess4gridpp", argv)?)
            .output(output))
    }
}

/// Quality control of the observations of each variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityControlTask;

impl QualityControlTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::QualityControl)
            .after(Predecessor::required(TaskKind::FirstGuess))
            .requires(["observations.sources"])
            .requires(Geometry::REQUIRED_KEYS)
            .paths(&["wrk", "archive_dir", "obs_dir"])
            .observational()
    }

    /// Resolve one QC run per variable.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let raw = raw_file(ctx)?;
        let sources = ctx.config.get_str_list("observations.sources")?.join(",");
        let obs_dir = ctx.path("obs_dir")?;

        let mut prepared = PreparedTask::new(ctx.node, workdir.clone())
            .input(raw.clone())
            .step(domain_step(ctx, &workdir)?);
        for var in variables(ctx)? {
            let output = qc_file(ctx, &var)?;
            let mut argv = vec![
                "--validtime".to_string(),
                basetime_arg(&ctx.cycle()),
                "--variable".to_string(),
                var.clone(),
                "--domain".to_string(),
                DOMAIN_FILE.to_string(),
                "--input".to_string(),
                obs_dir.join(format!("ob{}", basetime_arg(&ctx.cycle()))).display().to_string(),
                "--sources".to_string(),
                sources.clone(),
                "--first-guess".to_string(),
                raw.display().to_string(),
                "--output".to_string(),
                output.display().to_string(),
            ];
            append_extra_args(ctx, "qc.args", &mut argv)?;
            prepared = prepared.run(driver_command(ctx, "titan", argv)?).output(output);
        }
        Ok(prepared)
    }
}

/// Optimal interpolation of each variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimalInterpolationTask {
    /// Horizontal decorrelation length (m) unless `oi.hlength` is set
    pub hlength: f64,
    /// Vertical decorrelation length (m) unless `oi.vlength` is set
    pub vlength: f64,
}

impl Default for OptimalInterpolationTask {
    fn default() -> Self {
        Self {
            hlength: 30000.0,
            vlength: 100000.0,
        }
    }
}

impl OptimalInterpolationTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::OptimalInterpolation)
            .after(Predecessor::required(TaskKind::QualityControl))
            .paths(&["wrk", "archive_dir"])
            .observational()
    }

    /// Resolve one analysis per variable.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let raw = raw_file(ctx)?;
        let hlength = ctx.config.get_opt::<f64>("oi.hlength")?.unwrap_or(self.hlength);
        let vlength = ctx.config.get_opt::<f64>("oi.vlength")?.unwrap_or(self.vlength);

        let mut prepared = PreparedTask::new(ctx.node, workdir).input(raw.clone());
        for var in variables(ctx)? {
            let Some(field) = field_name(&var) else {
                warn!("No field translation for {}, skipped", var);
                continue;
            };
            let qc = qc_file(ctx, &var)?;
            let output = analysis_file(ctx, &var)?;
            let mut argv = vec![
                "--input-file".to_string(),
                raw.display().to_string(),
                "--output-file".to_string(),
                output.display().to_string(),
                "--var".to_string(),
                field.to_string(),
                "--obs-file".to_string(),
                qc.display().to_string(),
                "--hor".to_string(),
                hlength.to_string(),
                "--vert".to_string(),
                vlength.to_string(),
            ];
            append_extra_args(ctx, "oi.args", &mut argv)?;
            prepared = prepared
                .input(qc)
                .run(driver_command(ctx, "gridpp", argv)?)
                .output(output);
        }
        Ok(prepared)
    }
}

/// Converts the interpolated analyses to SODA observation input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Oi2sodaTask;

impl Oi2sodaTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::Oi2soda)
            .after(Predecessor::required(TaskKind::OptimalInterpolation))
            .paths(&["wrk", "archive_dir"])
            .observational()
    }

    /// Resolve the conversion for a node.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let output = soda_observation_file(ctx)?;
        let mut prepared = PreparedTask::new(ctx.node, workdir);

        let mut argv = Vec::new();
        for var in variables(ctx)? {
            let Some(field) = field_name(&var) else {
                warn!("No field translation for {}, skipped", var);
                continue;
            };
            let analysis = analysis_file(ctx, &var)?;
            argv.extend([
                format!("--{}-file", var),
                analysis.display().to_string(),
                format!("--{}-var", var),
                field.to_string(),
            ]);
            prepared = prepared.input(analysis);
        }
        argv.extend([
            "--output".to_string(),
            output.display().to_string(),
            basetime_arg(&ctx.cycle()),
        ]);
        Ok(prepared.run(driver_command(ctx, "oi2soda", argv)?).output(output))
    }
}

/// Converts quality-controlled observations to the monitoring database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Qc2obsmonTask;

impl Qc2obsmonTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::Qc2obsmon)
            .after(Predecessor::required(TaskKind::QualityControl))
            .after(Predecessor::if_enabled(TaskKind::OptimalInterpolation))
            .paths(&["wrk", "archive_dir"])
            .observational()
    }

    /// Resolve one conversion per variable.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let output = ctx.path("archive_dir")?.join("ecma.db");
        let raw = raw_file(ctx)?;
        let mut prepared = PreparedTask::new(ctx.node, workdir);
        for var in variables(ctx)? {
            let qc = qc_file(ctx, &var)?;
            let mut argv = vec![
                basetime_arg(&ctx.cycle()),
                var.clone(),
                qc.display().to_string(),
                "--fg-file".to_string(),
                raw.display().to_string(),
            ];
            let analysis = analysis_file(ctx, &var)?;
            if analysis.exists() {
                argv.extend(["--an-file".to_string(), analysis.display().to_string()]);
            }
            argv.extend(["--output".to_string(), output.display().to_string()]);
            prepared = prepared.input(qc).run(driver_command(ctx, "qc2obsmon", argv)?);
        }
        Ok(prepared.output(output))
    }
}
