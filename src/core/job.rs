//! Job and step domain models

use std::collections::HashMap;

/// A named unit of work: an ordered list of steps executed sequentially
/// in an isolated working directory.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job name
    pub name: String,

    /// Declared container image. Recorded for the report; commands run
    /// in a per-job sandbox directory on the host shell.
    pub image: Option<String>,

    /// Ordered steps
    pub steps: Vec<Step>,

    /// Static environment variables for every step
    pub environment: HashMap<String, String>,

    /// Names of host environment variables forwarded into the job.
    /// Their values are never logged.
    pub secrets: Vec<String>,

    /// Per-step timeout in seconds
    pub timeout_secs: u64,
}

/// A single executable action within a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Copy the trigger's source snapshot into the job workspace
    Checkout,

    /// Restore a cached path set if the rendered key exists; a miss is a
    /// no-op, not a failure
    RestoreCache { key: String },

    /// Snapshot the declared paths under the rendered key. First writer
    /// wins; an existing key is left untouched.
    SaveCache { key: String, paths: Vec<String> },

    /// Run an opaque command via the shell; any non-zero exit fails the
    /// owning job
    Run {
        name: Option<String>,
        command: String,
    },
}

impl Step {
    /// Human-readable label for events and the run report.
    pub fn label(&self) -> String {
        match self {
            Step::Checkout => "checkout".to_string(),
            Step::RestoreCache { key } => format!("restore_cache {}", key),
            Step::SaveCache { key, .. } => format!("save_cache {}", key),
            Step::Run { name, command } => name
                .clone()
                .unwrap_or_else(|| command.lines().next().unwrap_or("run").to_string()),
        }
    }
}
