//! Run and job state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall status of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every job finished and none failed
    Succeeded,
    /// At least one job failed
    Failed,
    /// Run was cancelled before completion
    Cancelled,
}

/// Why a job was skipped instead of run.
///
/// A skip is a deliberate outcome, distinct from failure, and is never
/// reported as one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The job's filter rejected the triggering ref
    FilterRejected,
    /// A dependency failed
    DependencyFailed(String),
    /// A dependency was itself skipped
    DependencySkipped(String),
    /// The run was cancelled before the job started
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::FilterRejected => write!(f, "filter rejected the triggering ref"),
            SkipReason::DependencyFailed(dep) => write!(f, "dependency '{}' failed", dep),
            SkipReason::DependencySkipped(dep) => write!(f, "dependency '{}' was skipped", dep),
            SkipReason::Cancelled => write!(f, "run was cancelled"),
        }
    }
}

/// State of a single job within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting on dependencies and the scheduler
    Pending,
    /// Steps are executing
    Running { started_at: DateTime<Utc> },
    /// Every step succeeded
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// A step failed; `output` is the captured output of that step
    Failed {
        step: String,
        error: String,
        output: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// The job never ran
    Skipped { reason: SkipReason },
}

impl JobState {
    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded { .. } | JobState::Failed { .. } | JobState::Skipped { .. }
        )
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, JobState::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobState::Failed { .. })
    }
}

/// Aggregate state of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Current run status
    pub status: RunStatus,

    /// When the run started
    pub started_at: Option<DateTime<Utc>>,

    /// When the run finished (succeeded, failed or cancelled)
    pub finished_at: Option<DateTime<Utc>>,

    /// Total number of jobs in the graph
    pub total_jobs: usize,

    /// Number of succeeded jobs
    pub succeeded_jobs: usize,

    /// Number of failed jobs
    pub failed_jobs: usize,

    /// Number of skipped jobs
    pub skipped_jobs: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            total_jobs: 0,
            succeeded_jobs: 0,
            failed_jobs: 0,
            skipped_jobs: 0,
        }
    }

    /// Mark the run as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    /// Settle the final status
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Refresh the per-state job counts
    pub fn update_counts(&mut self, succeeded: usize, failed: usize, skipped: usize) {
        self.succeeded_jobs = succeeded;
        self.failed_jobs = failed;
        self.skipped_jobs = skipped;
    }

    /// Fraction of jobs in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_jobs == 0 {
            return 0.0;
        }
        (self.succeeded_jobs + self.failed_jobs + self.skipped_jobs) as f64
            / self.total_jobs as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
