//! Run report - per-job terminal states for humans and machines

use crate::core::{JobState, PipelineRun, RunStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Terminal outcome of one job, flattened for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub name: String,
    pub outcome: JobOutcome,

    /// Why the job was skipped, when it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,

    /// The failing step's label, when the job failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Captured output of the failing step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Everything a caller needs to know about a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub trigger: String,
    pub status: RunStatus,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Build a report from a run, jobs in execution order.
pub fn build_report(run: &PipelineRun) -> RunReport {
    let jobs = run
        .execution_order()
        .iter()
        .filter_map(|name| run.job(name).map(|job| (name, job)))
        .map(|(name, job)| {
            let mut report = JobReport {
                name: name.clone(),
                outcome: JobOutcome::Pending,
                skip_reason: None,
                failed_step: None,
                error: None,
                output: None,
                started_at: None,
                finished_at: None,
            };

            match &job.state {
                JobState::Pending => {}
                JobState::Running { started_at } => {
                    report.outcome = JobOutcome::Running;
                    report.started_at = Some(*started_at);
                }
                JobState::Succeeded {
                    started_at,
                    finished_at,
                } => {
                    report.outcome = JobOutcome::Succeeded;
                    report.started_at = Some(*started_at);
                    report.finished_at = Some(*finished_at);
                }
                JobState::Failed {
                    step,
                    error,
                    output,
                    started_at,
                    failed_at,
                } => {
                    report.outcome = JobOutcome::Failed;
                    report.failed_step = Some(step.clone());
                    report.error = Some(error.clone());
                    report.output = Some(output.clone());
                    report.started_at = Some(*started_at);
                    report.finished_at = Some(*failed_at);
                }
                JobState::Skipped { reason } => {
                    report.outcome = JobOutcome::Skipped;
                    report.skip_reason = Some(reason.to_string());
                }
            }

            report
        })
        .collect();

    RunReport {
        run_id: run.state.run_id,
        workflow: run.workflow.clone(),
        trigger: run.trigger.reference.to_string(),
        status: run.state.status,
        jobs,
    }
}
