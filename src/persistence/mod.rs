//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{PipelineRun, RunStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of one pipeline run, as recorded in history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Workflow name
    pub workflow: String,

    /// Triggering ref (e.g. "branch main", "tag v1.2")
    pub trigger: String,

    /// Final run status
    pub status: RunStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if finished)
    pub finished_at: Option<DateTime<Utc>>,

    /// Total number of jobs in the run
    pub total_jobs: usize,

    /// Jobs that succeeded
    pub succeeded_jobs: usize,

    /// Jobs that failed
    pub failed_jobs: usize,

    /// Jobs that were skipped
    pub skipped_jobs: usize,
}

/// Trait for history backends
#[async_trait::async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Record a run summary
    async fn save_run(&self, summary: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs for a workflow, most recent first
    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>>;

    /// The most recent run for a workflow
    async fn latest_run(&self, workflow: &str) -> Result<Option<RunSummary>>;

    /// List all workflow names with recorded runs
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory history (for testing or ephemeral use)
pub struct InMemoryHistory {
    runs: tokio::sync::RwLock<std::collections::HashMap<Uuid, RunSummary>>,
    by_workflow: tokio::sync::RwLock<std::collections::HashMap<String, Vec<Uuid>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(std::collections::HashMap::new()),
            by_workflow: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HistoryBackend for InMemoryHistory {
    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.insert(summary.run_id, summary.clone());

        let mut by_workflow = self.by_workflow.write().await;
        let ids = by_workflow
            .entry(summary.workflow.clone())
            .or_insert_with(Vec::new);
        if !ids.contains(&summary.run_id) {
            ids.push(summary.run_id);
        }

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let by_workflow = self.by_workflow.read().await;

        let mut result: Vec<RunSummary> = by_workflow
            .get(workflow)
            .into_iter()
            .flatten()
            .filter_map(|id| runs.get(id).cloned())
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn latest_run(&self, workflow: &str) -> Result<Option<RunSummary>> {
        Ok(self.list_runs(workflow).await?.into_iter().next())
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let by_workflow = self.by_workflow.read().await;
        let mut names: Vec<String> = by_workflow.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Create a summary from a run's current state
pub fn create_summary(run: &PipelineRun) -> RunSummary {
    RunSummary {
        run_id: run.state.run_id,
        workflow: run.workflow.clone(),
        trigger: run.trigger.reference.to_string(),
        status: run.state.status,
        started_at: run.state.started_at.unwrap_or_else(Utc::now),
        finished_at: run.state.finished_at,
        total_jobs: run.state.total_jobs,
        succeeded_jobs: run.state.succeeded_jobs,
        failed_jobs: run.state.failed_jobs,
        skipped_jobs: run.state.skipped_jobs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(workflow: &str, status: RunStatus) -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            workflow: workflow.to_string(),
            trigger: "branch main".to_string(),
            status,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            total_jobs: 2,
            succeeded_jobs: 2,
            failed_jobs: 0,
            skipped_jobs: 0,
        }
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let history = InMemoryHistory::new();
        let summary = summary("build-deploy", RunStatus::Succeeded);

        history.save_run(&summary).await.unwrap();

        let loaded = history.load_run(summary.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.workflow, "build-deploy");

        let runs = history.list_runs("build-deploy").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(history.list_runs("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_run_is_most_recent() {
        let history = InMemoryHistory::new();

        let mut first = summary("main", RunStatus::Failed);
        first.started_at = Utc::now() - chrono::Duration::minutes(5);
        let second = summary("main", RunStatus::Succeeded);

        history.save_run(&first).await.unwrap();
        history.save_run(&second).await.unwrap();

        let latest = history.latest_run("main").await.unwrap().unwrap();
        assert_eq!(latest.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_saving_same_run_twice_does_not_duplicate() {
        let history = InMemoryHistory::new();
        let mut summary = summary("main", RunStatus::Running);

        history.save_run(&summary).await.unwrap();
        summary.status = RunStatus::Succeeded;
        history.save_run(&summary).await.unwrap();

        let runs = history.list_runs("main").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Succeeded);
    }
}
