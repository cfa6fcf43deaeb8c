//! Command abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Errors raised before a command produced an exit status.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The program could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The command did not finish within its timeout
    #[error("{program} timed out after {after:?}")]
    Timeout {
        /// Program name
        program: String,
        /// Configured timeout
        after: Duration,
    },
}

/// Something that runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError>;
}

/// Input to a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute
    pub program: String,

    /// Command arguments
    pub args: Vec<String>,

    /// Environment variables
    pub env: BTreeMap<String, String>,

    /// Working directory
    pub cwd: Option<PathBuf>,

    /// Standard input
    pub stdin: Option<String>,

    /// Timeout
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Command without arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Run in `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Feed `input` on standard input.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Bound the run time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output from a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Execution duration
    pub duration: Duration,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_display() {
        let spec = CommandSpec::new("PGD-offline")
            .arg("--domain")
            .args(["conf", "-f"])
            .env("OMP_NUM_THREADS", "4")
            .timeout(Duration::from_secs(10));
        assert_eq!(spec.display(), "PGD-offline --domain conf -f");
        assert_eq!(spec.env["OMP_NUM_THREADS"], "4");
        assert_eq!(spec.timeout, Some(Duration::from_secs(10)));
    }
}
