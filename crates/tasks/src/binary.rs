//! Helpers shared by the tasks that drive surface model binaries and tools.

use crate::context::TaskContext;
use crate::error::TaskError;
use crate::prepared::Step;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use surfexp_core::{compact_dtg, decade, Dtg};
use surfexp_tools::CommandSpec;
use tracing::{debug, warn};

/// Name of the system path file handed to the drivers.
pub const EXP_FILE_PATHS: &str = "exp_file_paths.json";
/// Name of the domain file handed to the drivers.
pub const DOMAIN_FILE: &str = "domain.json";

/// `YYYYMMDDHH` form used on driver command lines.
pub fn basetime_arg(dtg: &Dtg) -> String {
    compact_dtg(dtg)[..10].to_string()
}

/// Surface file suffix, e.g. `.nc`.
pub fn suffix(ctx: &TaskContext) -> Result<String, TaskError> {
    let file_type = ctx
        .config
        .get_opt::<String>("surfex.file_type")?
        .unwrap_or_else(|| "nc".to_string());
    Ok(format!(".{}", file_type.to_lowercase()))
}

/// Static physiography file, per decade when `pgd.one_decade` is set.
pub fn pgd_file(ctx: &TaskContext) -> Result<PathBuf, TaskError> {
    let climdir = ctx.path("climdir")?;
    let one_decade = ctx.config.get_bool_or("pgd.one_decade", false)?;
    let decade = if one_decade {
        format!("_{}", decade(&ctx.cycle()))
    } else {
        String::new()
    };
    Ok(climdir.join(format!("PGD{}{}", decade, suffix(ctx)?)))
}

/// A surface file in the archive of the node's cycle.
pub fn archive_file(ctx: &TaskContext, stem: &str) -> Result<PathBuf, TaskError> {
    Ok(ctx.path("archive_dir")?.join(format!("{}{}", stem, suffix(ctx)?)))
}

/// Find the executable of `binary`.
///
/// Search order: task exception `bindir`, host `bindir` (`<BIN>-offline`,
/// then `<BIN>`), `submission.bindir`. A task exception may also rename the
/// binary.
pub fn resolve_binary(ctx: &TaskContext, binary: &str) -> Result<PathBuf, TaskError> {
    let exception = [ctx.kind().task_name(), ctx.kind().as_str()]
        .iter()
        .map(|name| format!("submission.task_exceptions.{}", name))
        .find(|key| ctx.config.contains(key));

    let mut name = binary.to_string();
    let mut searched = Vec::new();
    if let Some(key) = &exception {
        if let Some(renamed) = ctx.config.get_opt::<String>(&format!("{}.binary", key))? {
            name = renamed;
        }
        if let Some(dir) = ctx.config.get_opt::<String>(&format!("{}.bindir", key))? {
            searched.push(Path::new(&dir).join(&name));
        }
    }
    if ctx.has_path("bindir") {
        let dir = ctx.path("bindir")?;
        searched.push(dir.join(format!("{}-offline", name)));
        searched.push(dir.join(&name));
    }
    if let Some(dir) = ctx.config.get_opt::<String>("submission.bindir")? {
        searched.push(Path::new(&dir).join(&name));
    }

    match searched.iter().find(|p| p.exists()) {
        Some(found) => {
            debug!("Using binary {}", found.display());
            Ok(found.clone())
        }
        None => Err(TaskError::BinaryNotFound {
            binary: name,
            searched,
        }),
    }
}

/// Append `--key value` pairs from `<section>` (a mapping) to `argv`.
///
/// Booleans become bare flags when true. Keys already on the command line
/// cannot be overridden and are skipped.
pub fn append_extra_args(ctx: &TaskContext, section: &str, argv: &mut Vec<String>) -> Result<(), TaskError> {
    let extra: Map<String, Value> = ctx.config.get_opt(section)?.unwrap_or_default();
    for (key, value) in extra {
        let flag = format!("--{}", key);
        if argv.contains(&flag) {
            warn!("Setting {} from {} can not be overridden", key, section);
            continue;
        }
        match value {
            Value::Bool(true) => argv.push(flag),
            Value::Bool(false) | Value::Null => {}
            Value::String(s) => argv.extend([flag, s]),
            other => argv.extend([flag, other.to_string()]),
        }
    }
    Ok(())
}

/// Command for a driver program; `submission.drivers.<name>` may replace it.
pub fn driver_command(ctx: &TaskContext, name: &str, argv: Vec<String>) -> Result<CommandSpec, TaskError> {
    let program = ctx
        .config
        .get_opt::<String>(&format!("submission.drivers.{}", name))?
        .unwrap_or_else(|| name.to_string());
    let mut spec = CommandSpec::new(program).args(argv);
    if ctx.config.contains("submission.task_timeout") {
        let limit = ctx.config.get_duration("submission.task_timeout")?;
        if let Ok(limit) = limit.to_std() {
            spec = spec.timeout(limit);
        }
    }
    Ok(spec)
}

/// Arguments every model binary driver takes.
pub fn binary_argv(ctx: &TaskContext, binary: &Path) -> Result<Vec<String>, TaskError> {
    let mut argv = vec![
        "--system-file-paths".to_string(),
        EXP_FILE_PATHS.to_string(),
        "--basetime".to_string(),
        basetime_arg(&ctx.cycle()),
        "--binary".to_string(),
        binary.display().to_string(),
    ];
    if let Some(wrapper) = ctx.config.get_opt::<String>("submission.wrapper")? {
        argv.extend(["--wrapper".to_string(), wrapper]);
    }
    if ctx.has_path("sfx_input_definition") {
        argv.extend([
            "--input-binary-data".to_string(),
            ctx.path("sfx_input_definition")?.display().to_string(),
        ]);
    }
    Ok(argv)
}

/// Step writing the resolved `system.*` paths of this cycle.
pub fn exp_file_paths_step(ctx: &TaskContext, workdir: &Path) -> Result<Step, TaskError> {
    let bindings = ctx.bindings();
    let mut paths = Map::new();
    for (key, template) in ctx.config.string_leaves("system") {
        let value = ctx.resolver().expand(&template, &bindings)?;
        paths.insert(key, Value::String(value));
    }
    Ok(Step::WriteFile {
        path: workdir.join(EXP_FILE_PATHS),
        contents: serde_json::to_string_pretty(&Value::Object(paths))?,
    })
}

/// Step writing the domain file.
pub fn domain_step(ctx: &TaskContext, workdir: &Path) -> Result<Step, TaskError> {
    Ok(Step::WriteFile {
        path: workdir.join(DOMAIN_FILE),
        contents: serde_json::to_string_pretty(&ctx.geometry()?.to_domain_json())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use serde_json::json;
    use surfexp_core::{parse_dtg, NodeId, TaskKind};

    fn node() -> NodeId {
        NodeId::new(TaskKind::Forecast, parse_dtg("2022020100").unwrap(), None)
    }

    #[test]
    fn test_binary_search_order() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        let sub = dir.path().join("submission");
        let exc = dir.path().join("exceptions");
        for d in [&bin, &sub, &exc] {
            std::fs::create_dir_all(d).unwrap();
        }
        std::fs::write(sub.join("OFFLINE"), b"").unwrap();
        let extra = json!({"submission": {"bindir": sub.display().to_string()}});
        let ctx = context(dir.path(), node(), extra.clone());
        assert_eq!(resolve_binary(&ctx, "OFFLINE").unwrap(), sub.join("OFFLINE"));

        std::fs::write(bin.join("OFFLINE"), b"").unwrap();
        assert_eq!(resolve_binary(&ctx, "OFFLINE").unwrap(), bin.join("OFFLINE"));
        std::fs::write(bin.join("OFFLINE-offline"), b"").unwrap();
        assert_eq!(resolve_binary(&ctx, "OFFLINE").unwrap(), bin.join("OFFLINE-offline"));

        std::fs::write(exc.join("MY_OFFLINE"), b"").unwrap();
        let extra = json!({
            "submission.bindir": sub.display().to_string(),
            "submission.task_exceptions.OfflineForecast": {
                "binary": "MY_OFFLINE",
                "bindir": exc.display().to_string()
            }
        });
        let ctx = context(dir.path(), node(), extra);
        assert_eq!(resolve_binary(&ctx, "OFFLINE").unwrap(), exc.join("MY_OFFLINE"));

        assert!(matches!(
            resolve_binary(&ctx, "SODA"),
            Err(TaskError::BinaryNotFound { .. })
        ));
    }

    #[test]
    fn test_extra_args() {
        let dir = tempfile::tempdir().unwrap();
        let extra = json!({"offline": {"args": {
            "output-frequency": 3600, "tolerant": true, "skip": false, "basetime": "x", "mode": "cycle"
        }}});
        let ctx = context(dir.path(), node(), extra);
        let mut argv = vec!["--basetime".to_string(), "2022020100".to_string()];
        append_extra_args(&ctx, "offline.args", &mut argv).unwrap();
        assert_eq!(
            argv,
            vec!["--basetime", "2022020100", "--mode", "cycle", "--output-frequency", "3600", "--tolerant"]
        );
    }

    #[test]
    fn test_pgd_file_per_decade() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), node(), json!({"pgd.one_decade": true}));
        assert!(pgd_file(&ctx).unwrap().ends_with("climate/PGD_0205.nc"));
        let ctx = context(dir.path(), node(), json!({"surfex.file_type": "FA"}));
        assert!(pgd_file(&ctx).unwrap().ends_with("climate/PGD.fa"));
    }
}
