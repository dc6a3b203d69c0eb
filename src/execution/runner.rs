//! Step runner - executes single steps against a job sandbox

use crate::cache::{render_key, CacheStore, Snapshot};
use crate::core::{Job, Step};
use crate::shell::CommandRunner;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one step
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Success {
        output: String,
    },
    /// `output` is whatever the step captured before failing; for run
    /// steps that is the command's combined stdout/stderr
    Failure {
        error: String,
        output: String,
    },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success { .. })
    }

    fn failure(error: impl Into<String>) -> Self {
        StepOutcome::Failure {
            error: error.into(),
            output: String::new(),
        }
    }
}

/// The isolated environment one job executes in
#[derive(Debug, Clone)]
pub struct JobSandbox {
    /// Per-job working directory; all steps run here
    pub workdir: PathBuf,

    /// Environment variables surfaced to every run step
    pub env: HashMap<String, String>,

    /// Source tree the checkout step copies in
    pub source: Option<PathBuf>,
}

/// Executes one step at a time: run commands through the shell, cache
/// steps against the injected store.
pub struct StepRunner<C> {
    shell: C,
    cache: Arc<dyn CacheStore>,
}

impl<C: CommandRunner> StepRunner<C> {
    pub fn new(shell: C, cache: Arc<dyn CacheStore>) -> Self {
        Self { shell, cache }
    }

    /// Execute a step and report success or failure. Failures carry a
    /// reason and any captured output; they never panic the run.
    pub async fn execute(&self, job: &Job, step: &Step, sandbox: &JobSandbox) -> StepOutcome {
        info!(job = %job.name, step = %step.label(), "executing step");

        match step {
            Step::Checkout => self.checkout(sandbox),
            Step::RestoreCache { key } => self.restore_cache(key, sandbox).await,
            Step::SaveCache { key, paths } => self.save_cache(key, paths, sandbox).await,
            Step::Run { command, .. } => self.run_command(job, command, sandbox).await,
        }
    }

    fn checkout(&self, sandbox: &JobSandbox) -> StepOutcome {
        let Some(source) = &sandbox.source else {
            debug!("no source snapshot bound to this run, checkout is a no-op");
            return StepOutcome::Success {
                output: String::new(),
            };
        };

        match copy_tree(source, &sandbox.workdir) {
            Ok(files) => StepOutcome::Success {
                output: format!("checked out {} files", files),
            },
            Err(err) => StepOutcome::failure(format!("checkout failed: {}", err)),
        }
    }

    async fn restore_cache(&self, key: &str, sandbox: &JobSandbox) -> StepOutcome {
        let key = match render_key(key, &sandbox.workdir) {
            Ok(key) => key,
            Err(err) => return StepOutcome::failure(err.to_string()),
        };

        match self.cache.get(&key).await {
            Ok(Some(snapshot)) => match snapshot.restore(&sandbox.workdir) {
                Ok(()) => StepOutcome::Success {
                    output: format!("restored {} files for key {}", snapshot.len(), key),
                },
                Err(err) => StepOutcome::failure(format!("cache restore failed: {}", err)),
            },
            // A miss only skips the restoration
            Ok(None) => {
                debug!(key, "cache miss, continuing without restore");
                StepOutcome::Success {
                    output: format!("cache miss for key {}", key),
                }
            }
            Err(err) => StepOutcome::failure(err.to_string()),
        }
    }

    async fn save_cache(&self, key: &str, paths: &[String], sandbox: &JobSandbox) -> StepOutcome {
        let key = match render_key(key, &sandbox.workdir) {
            Ok(key) => key,
            Err(err) => return StepOutcome::failure(err.to_string()),
        };

        match self.cache.contains(&key).await {
            Ok(true) => {
                debug!(key, "cache key already present, skipping save");
                return StepOutcome::Success {
                    output: format!("cache key {} already saved", key),
                };
            }
            Ok(false) => {}
            Err(err) => return StepOutcome::failure(err.to_string()),
        }

        let snapshot = match Snapshot::capture(&sandbox.workdir, paths) {
            Ok(snapshot) => snapshot,
            Err(err) => return StepOutcome::failure(format!("cache capture failed: {}", err)),
        };

        match self.cache.put(&key, snapshot).await {
            Ok(()) => StepOutcome::Success {
                output: format!("saved cache key {}", key),
            },
            Err(err) => StepOutcome::failure(err.to_string()),
        }
    }

    async fn run_command(&self, job: &Job, command: &str, sandbox: &JobSandbox) -> StepOutcome {
        match self
            .shell
            .run(command, &sandbox.workdir, &sandbox.env, job.timeout_secs)
            .await
        {
            Ok(result) if result.success() => StepOutcome::Success {
                output: result.output,
            },
            Ok(result) => {
                warn!(job = %job.name, exit_code = result.exit_code, "command failed");
                StepOutcome::Failure {
                    error: format!("command exited with code {}", result.exit_code),
                    output: result.output,
                }
            }
            Err(err) => StepOutcome::failure(err.to_string()),
        }
    }
}

/// Recursively copy a source tree into a workdir, returning the file count
fn copy_tree(source: &Path, target: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        let dest = target.join(entry.file_name());
        if path.is_dir() {
            copied += copy_tree(&path, &dest)?;
        } else if path.is_file() {
            std::fs::copy(&path, &dest)?;
            copied += 1;
        }
    }
    Ok(copied)
}
