//! Shared helpers for scenario tests

use async_trait::async_trait;
use conveyor::cache::CacheStore;
use conveyor::core::config::PipelineConfig;
use conveyor::core::{JobGraph, PipelineRun, Trigger};
use conveyor::execution::{RunReport, SchedulingStrategy, WorkflowEngine};
use conveyor::shell::{CommandError, CommandOutput, CommandRunner};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One command invocation as seen by the mock shell
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub command: String,
    pub workdir: PathBuf,
    pub env: HashMap<String, String>,
}

/// Scripted stand-in for the real shell. Commands succeed unless an
/// exit code was scripted for them; every call is recorded.
#[derive(Default)]
pub struct MockShell {
    exit_codes: Mutex<HashMap<String, i32>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the exit code for an exact command string
    pub fn script(self, command: &str, exit_code: i32) -> Self {
        if let Ok(mut codes) = self.exit_codes.lock() {
            codes.insert(command.to_string(), exit_code);
        }
        self
    }

    /// Handle for inspecting recorded calls after a run
    pub fn calls(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl CommandRunner for MockShell {
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        env: &HashMap<String, String>,
        _timeout_secs: u64,
    ) -> Result<CommandOutput, CommandError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                command: command.to_string(),
                workdir: workdir.to_path_buf(),
                env: env.clone(),
            });
        }

        let exit_code = self
            .exit_codes
            .lock()
            .map(|codes| codes.get(command).copied().unwrap_or(0))
            .unwrap_or(0);

        Ok(CommandOutput {
            exit_code,
            output: format!("ran: {}", command),
        })
    }
}

/// Build a run for the sole (or named) workflow in the YAML
pub fn run_for(yaml: &str, workflow: Option<&str>, trigger: Trigger) -> PipelineRun {
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let workflow = config.select_workflow(workflow).unwrap().to_string();
    let graph = JobGraph::from_config(&config, &workflow).unwrap();
    PipelineRun::new(&graph, trigger)
}

/// Execute a run with the given shell against a temp workspace
pub async fn execute_with<C: CommandRunner + 'static>(
    shell: C,
    cache: Arc<dyn CacheStore>,
    run: &mut PipelineRun,
) -> RunReport {
    let workspace = tempfile::tempdir().unwrap();
    let engine = WorkflowEngine::new(shell, cache, SchedulingStrategy::Sequential)
        .with_workspace_root(workspace.path());
    engine.execute(run).await.unwrap()
}

/// Commands the mock shell saw, in order
pub fn commands_run(calls: &Arc<Mutex<Vec<RecordedCall>>>) -> Vec<String> {
    calls
        .lock()
        .unwrap()
        .iter()
        .map(|call| call.command.clone())
        .collect()
}
