//! Once-per-experiment stages: building the offline binaries and generating
//! the static physiography fields.

use crate::binary::{append_extra_args, binary_argv, domain_step, driver_command, exp_file_paths_step, pgd_file, resolve_binary, DOMAIN_FILE};
use crate::context::TaskContext;
use crate::declaration::{Predecessor, TaskDeclaration};
use crate::error::TaskError;
use crate::geometry::Geometry;
use crate::prepared::{PreparedTask, Step};
use std::path::Path;
use surfexp_core::TaskKind;
use surfexp_tools::CommandSpec;

/// Builds and installs the offline binaries with cmake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOfflineTask {
    /// Parallel build jobs unless `compile.nproc` is set
    pub nproc: u32,
    /// cmake targets
    pub targets: Vec<String>,
    /// Programs installed into the host `bindir`
    pub programs: Vec<String>,
}

impl Default for CompileOfflineTask {
    fn default() -> Self {
        Self {
            nproc: 8,
            targets: ["offline-pgd", "offline-prep", "offline-offline", "offline-soda"]
                .map(String::from)
                .to_vec(),
            programs: ["PGD-offline", "PREP-offline", "OFFLINE-offline", "SODA-offline"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl CompileOfflineTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::CompileOffline)
            .once()
            .requires(["compile.source"])
            .paths(&["casedir", "bindir"])
    }

    /// Resolve the build for a node.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let source = ctx.config.get_str("compile.source")?.to_string();
        let nproc = ctx.config.get_u64_or("compile.nproc", u64::from(self.nproc))?;
        let casedir = ctx.path("casedir")?;
        let bindir = ctx.path("bindir")?;
        let build_dir = casedir.join("offline").join("build");
        let install_dir = casedir.join("offline").join("install");

        let mut configure = CommandSpec::new("cmake")
            .arg(format!("{}/src", source))
            .arg("-DCMAKE_BUILD_TYPE=Release")
            .arg(format!("-DCMAKE_INSTALL_PREFIX={}", install_dir.display()))
            .arg("-DCMAKE_INSTALL_RPATH_USE_LINK_PATH=YES")
            .current_dir(&build_dir);
        if let Some(build_config) = ctx.config.get_opt::<String>("compile.build_config")? {
            configure = configure.arg(format!(
                "-DCONFIG_FILE={}/util/cmake/config/config.{}.json",
                source, build_config
            ));
        }
        let build = CommandSpec::new("cmake")
            .args(["--build", ".", "--"])
            .arg(format!("-j{}", nproc))
            .args(self.targets.iter().cloned())
            .current_dir(&build_dir);

        let mut prepared = PreparedTask::new(ctx.node, build_dir.clone())
            .input(Path::new(&source).join("src"))
            .run(configure)
            .run(build);
        for program in &self.programs {
            prepared = prepared
                .step(Step::Copy {
                    from: build_dir.join("bin").join(program),
                    to: bindir.join(program),
                })
                .output(bindir.join(program));
        }
        Ok(prepared)
    }
}

/// Generates the static physiography (PGD) file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgdTask {
    /// Binary name
    pub binary: &'static str,
}

impl Default for PgdTask {
    fn default() -> Self {
        Self { binary: "PGD" }
    }
}

impl PgdTask {
    /// Static declaration.
    pub fn declaration() -> TaskDeclaration {
        TaskDeclaration::new(TaskKind::Pgd)
            .once()
            .after(Predecessor::if_enabled(TaskKind::CompileOffline))
            .requires(Geometry::REQUIRED_KEYS)
            .paths(&["wrk", "climdir"])
    }

    /// Resolve the PGD run for a node.
    pub fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
        let workdir = ctx.workdir()?;
        let binary = resolve_binary(ctx, self.binary)?;
        let output = pgd_file(ctx)?;

        let mut argv = binary_argv(ctx, &binary)?;
        argv.extend([
            "--domain".to_string(),
            DOMAIN_FILE.to_string(),
            "--output".to_string(),
            output.display().to_string(),
        ]);
        if ctx.config.get_bool_or("pgd.one_decade", false)? {
            argv.push("--one-decade".to_string());
        }
        append_extra_args(ctx, "pgd.args", &mut argv)?;

        Ok(PreparedTask::new(ctx.node, workdir.clone())
            .step(domain_step(ctx, &workdir)?)
            .step(exp_file_paths_step(ctx, &workdir)?)
            .run(driver_command(ctx, "pgd", argv)?)
            .output(output)
            .archive_logs(["OPTIONS.nam", "LISTING_PGD.txt"], ctx.path("climdir")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use serde_json::json;
    use surfexp_core::{parse_dtg, NodeId};

    #[test]
    fn test_compile_steps() {
        let dir = tempfile::tempdir().unwrap();
        let node = NodeId::new(TaskKind::CompileOffline, parse_dtg("2022020100").unwrap(), None);
        let ctx = context(dir.path(), node, json!({"compile": {"source": "/src/offline", "nproc": 4}}));
        let prepared = CompileOfflineTask::default().prepare(&ctx).unwrap();
        let commands: Vec<String> = prepared.commands().map(|c| c.display()).collect();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].starts_with("cmake /src/offline/src"));
        assert!(commands[1].contains("-j4 offline-pgd"));
        assert_eq!(prepared.outputs.len(), 4);
        assert!(prepared.outputs[0].ends_with("bin/PGD-offline"));
    }

    #[test]
    fn test_pgd_prepare() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/PGD-offline"), b"").unwrap();
        let node = NodeId::new(TaskKind::Pgd, parse_dtg("2022020100").unwrap(), None);
        let ctx = context(dir.path(), node, json!({"pgd": {"args": {"tolerate-missing": true}}}));
        let prepared = PgdTask::default().prepare(&ctx).unwrap();
        let cmd = prepared.commands().next().unwrap();
        assert_eq!(cmd.program, "pgd");
        assert!(cmd.args.contains(&"--tolerate-missing".to_string()));
        assert!(prepared.outputs[0].ends_with("climate/PGD.nc"));
        assert!(prepared.workdir.ends_with("wrk/20220201_00/pgd"));
    }
}
