//! Pipeline run domain model

use crate::core::filter::{JobFilter, TriggerRef};
use crate::core::graph::JobGraph;
use crate::core::job::Job;
use crate::core::state::{JobState, RunState, RunStatus};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// What started a run: the ref plus an optional source snapshot tree
/// (materialized into each job workspace by the `checkout` step).
#[derive(Debug, Clone)]
pub struct Trigger {
    pub reference: TriggerRef,
    pub source: Option<PathBuf>,
}

impl Trigger {
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            reference: TriggerRef::Branch(name.into()),
            source: None,
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            reference: TriggerRef::Tag(name.into()),
            source: None,
        }
    }

    pub fn with_source(mut self, source: PathBuf) -> Self {
        self.source = Some(source);
        self
    }
}

/// One job within a run: the definition plus its runtime state
#[derive(Debug, Clone)]
pub struct JobRun {
    pub job: Job,
    pub requires: Vec<String>,
    pub filter: JobFilter,
    pub state: JobState,
}

/// One end-to-end execution of a job graph for a given trigger
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Workflow name
    pub workflow: String,

    /// The ref and source snapshot this run is bound to
    pub trigger: Trigger,

    /// Per-job runtime state
    pub jobs: HashMap<String, JobRun>,

    /// Aggregate run state
    pub state: RunState,

    /// Deterministic execution order from the graph
    execution_order: Vec<String>,
}

impl PipelineRun {
    /// Bind a graph to a trigger, with every job pending.
    pub fn new(graph: &JobGraph, trigger: Trigger) -> Self {
        let jobs = graph
            .execution_order()
            .iter()
            .filter_map(|name| graph.node(name).map(|node| (name.clone(), node.clone())))
            .map(|(name, node)| {
                (
                    name,
                    JobRun {
                        job: node.job,
                        requires: node.requires,
                        filter: node.filter,
                        state: JobState::Pending,
                    },
                )
            })
            .collect();

        Self {
            workflow: graph.workflow.clone(),
            trigger,
            jobs,
            state: RunState::new(),
            execution_order: graph.execution_order().to_vec(),
        }
    }

    pub fn job(&self, name: &str) -> Option<&JobRun> {
        self.jobs.get(name)
    }

    pub fn job_mut(&mut self, name: &str) -> Option<&mut JobRun> {
        self.jobs.get_mut(name)
    }

    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Jobs whose dependencies have all succeeded and which are still
    /// pending. Filter decisions are not made here; the engine settles
    /// filter skips before scheduling.
    pub fn ready_jobs(&self) -> Vec<&str> {
        let succeeded: HashSet<&str> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.state.is_succeeded())
            .map(|(name, _)| name.as_str())
            .collect();

        self.execution_order
            .iter()
            .filter(|name| {
                let job = &self.jobs[name.as_str()];
                matches!(job.state, JobState::Pending)
                    && job.requires.iter().all(|dep| succeeded.contains(dep.as_str()))
            })
            .map(String::as_str)
            .collect()
    }

    /// True when every job reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.jobs.values().all(|job| job.state.is_terminal())
    }

    /// True when any job failed
    pub fn has_failed(&self) -> bool {
        self.jobs.values().any(|job| job.state.is_failed())
    }

    /// The final status implied by the job states
    pub fn final_status(&self) -> RunStatus {
        if self.has_failed() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    /// Recount terminal jobs into the aggregate state
    pub fn refresh_counts(&mut self) {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for job in self.jobs.values() {
            match &job.state {
                JobState::Succeeded { .. } => succeeded += 1,
                JobState::Failed { .. } => failed += 1,
                JobState::Skipped { .. } => skipped += 1,
                _ => {}
            }
        }
        self.state.update_counts(succeeded, failed, skipped);
    }
}
