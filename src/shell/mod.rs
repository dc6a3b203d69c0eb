//! Shell command execution

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Error types for shell invocations
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn shell: {0}")]
    Spawn(String),

    #[error("timed out after {0} seconds")]
    Timeout(u64),
}

/// Captured result of one command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Process exit code (-1 when killed by a signal)
    pub exit_code: i32,

    /// Combined stdout and stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for running opaque command bodies - allows tests to substitute
/// a scripted runner for the real shell.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command in a working directory with extra environment
    /// variables, capturing output. A non-zero exit is NOT an `Err`;
    /// callers read `CommandOutput::success`.
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        env: &HashMap<String, String>,
        timeout_secs: u64,
    ) -> Result<CommandOutput, CommandError>;
}

/// Runs commands through `sh -c`
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Shell executable (e.g. "sh", "/bin/bash")
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        env: &HashMap<String, String>,
        timeout_secs: u64,
    ) -> Result<CommandOutput, CommandError> {
        // Log the command and env var names, never env var values
        debug!(
            command,
            workdir = %workdir.display(),
            env_keys = ?env.keys().collect::<Vec<_>>(),
            "spawning shell"
        );

        let result = timeout(
            Duration::from_secs(timeout_secs),
            Command::new(&self.shell)
                .arg("-c")
                .arg(command)
                .current_dir(workdir)
                .envs(env)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| CommandError::Timeout(timeout_secs))?;

        let output = result.map_err(|e| CommandError::Spawn(e.to_string()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}
