//! Local process execution.

use super::r#trait::{CommandOutput, CommandRunner, CommandSpec, ToolError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs commands as child processes of this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
        let start = std::time::Instant::now();
        debug!("Running {}", spec.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let spawn_error = |source| ToolError::Spawn {
            program: spec.program.clone(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_error)?;
        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await.map_err(spawn_error)?;
        }

        let wait = child.wait_with_output();
        let output = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result.map_err(spawn_error)?,
                Err(_) => {
                    warn!("{} timed out after {:?}", spec.program, limit);
                    return Err(ToolError::Timeout {
                        program: spec.program.clone(),
                        after: limit,
                    });
                }
            },
            None => wait.await.map_err(spawn_error)?,
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}
