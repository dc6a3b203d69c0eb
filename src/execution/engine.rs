//! Workflow engine - orchestrates one pipeline run

use crate::cache::CacheStore;
use crate::core::{JobState, PipelineRun, RunStatus, SkipReason, TriggerRef};
use crate::execution::report::{build_report, RunReport};
use crate::execution::runner::{JobSandbox, StepOutcome, StepRunner};
use crate::execution::scheduler::{RunScheduler, SchedulingStrategy};
use crate::shell::CommandRunner;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events emitted while a run executes
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        workflow: String,
        trigger: String,
    },
    JobStarted {
        job: String,
    },
    StepStarted {
        job: String,
        step: String,
    },
    JobSucceeded {
        job: String,
    },
    JobFailed {
        job: String,
        step: String,
        error: String,
    },
    JobSkipped {
        job: String,
        reason: SkipReason,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(RunEvent) + Send + Sync>;

/// Cooperative cancellation signal. Cancelling marks every job that has
/// not started as skipped; running jobs finish their current wave.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How one job's steps ended, reported back from its wave task
struct JobFailure {
    step: String,
    error: String,
    output: String,
}

/// Drives a `PipelineRun` to completion: settles filter and cascade
/// skips, schedules ready jobs, executes their steps, and reports.
pub struct WorkflowEngine<C> {
    scheduler: RunScheduler,
    runner: Arc<StepRunner<C>>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
    cancel: CancelHandle,

    /// Root under which per-job sandboxes are created
    workspace_root: PathBuf,

    /// Extra environment applied to every job (CLI overrides)
    extra_env: HashMap<String, String>,

    /// Leave the run's sandbox directories in place after the run
    keep_workspace: bool,
}

impl<C: CommandRunner + 'static> WorkflowEngine<C> {
    pub fn new(shell: C, cache: Arc<dyn CacheStore>, strategy: SchedulingStrategy) -> Self {
        Self {
            scheduler: RunScheduler::new(strategy),
            runner: Arc::new(StepRunner::new(shell, cache)),
            event_handlers: Arc::new(Mutex::new(Vec::new())),
            cancel: CancelHandle::default(),
            workspace_root: std::env::temp_dir().join("conveyor"),
            extra_env: HashMap::new(),
            keep_workspace: false,
        }
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.extra_env = env;
        self
    }

    pub fn with_keep_workspace(mut self, keep: bool) -> Self {
        self.keep_workspace = keep;
        self
    }

    /// Handle for cancelling this engine's runs (e.g. from a ctrl-c task)
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(RunEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.event_handlers.lock() {
            handlers.push(Arc::new(handler));
        }
    }

    fn emit(&self, event: RunEvent) {
        emit_all(&self.event_handlers, event);
    }

    /// Execute the run to completion and build its report.
    pub async fn execute(&self, run: &mut PipelineRun) -> anyhow::Result<RunReport> {
        let run_id = run.state.run_id;
        info!(workflow = %run.workflow, %run_id, trigger = %run.trigger.reference, "starting run");

        run.state.start(run.jobs.len());
        self.emit(RunEvent::RunStarted {
            run_id,
            workflow: run.workflow.clone(),
            trigger: run.trigger.reference.to_string(),
        });

        while !run.is_complete() {
            if self.cancel.is_cancelled() {
                self.skip_remaining(run);
                run.refresh_counts();
                run.state.finish(RunStatus::Cancelled);
                warn!(%run_id, "run cancelled");
                self.emit(RunEvent::RunCompleted {
                    run_id,
                    status: RunStatus::Cancelled,
                });
                self.cleanup_workspace(run);
                return Ok(build_report(run));
            }

            self.settle_skips(run);
            if run.is_complete() {
                break;
            }

            let batch = self.scheduler.next_jobs(run);
            if batch.is_empty() {
                // Unreachable for a validated DAG: every pending job
                // either becomes ready or gets swept into a skip
                error!(%run_id, "no runnable jobs left");
                anyhow::bail!("run stalled with no runnable jobs");
            }

            self.run_batch(run, &batch).await?;
            run.refresh_counts();
        }

        let status = run.final_status();
        run.refresh_counts();
        run.state.finish(status);

        info!(workflow = %run.workflow, %run_id, ?status, "run finished");
        self.emit(RunEvent::RunCompleted { run_id, status });

        self.cleanup_workspace(run);
        Ok(build_report(run))
    }

    /// Settle every pending job that can no longer run: filter
    /// rejections and cascading dependency failures/skips. Loops until
    /// a fixpoint so skips propagate transitively.
    fn settle_skips(&self, run: &mut PipelineRun) {
        loop {
            let mut decided: Vec<(String, SkipReason)> = Vec::new();

            for name in run.execution_order().to_vec() {
                let Some(job) = run.job(&name) else { continue };
                if !matches!(job.state, JobState::Pending) {
                    continue;
                }

                if !job.filter.accepts(&run.trigger.reference) {
                    decided.push((name, SkipReason::FilterRejected));
                    continue;
                }

                let blocked = job.requires.iter().find_map(|dep| {
                    run.job(dep).and_then(|dep_job| match &dep_job.state {
                        JobState::Failed { .. } => {
                            Some(SkipReason::DependencyFailed(dep.clone()))
                        }
                        JobState::Skipped { .. } => {
                            Some(SkipReason::DependencySkipped(dep.clone()))
                        }
                        _ => None,
                    })
                });
                if let Some(reason) = blocked {
                    decided.push((name, reason));
                }
            }

            if decided.is_empty() {
                return;
            }
            for (name, reason) in decided {
                info!(job = %name, %reason, "skipping job");
                if let Some(job) = run.job_mut(&name) {
                    job.state = JobState::Skipped {
                        reason: reason.clone(),
                    };
                }
                self.emit(RunEvent::JobSkipped { job: name, reason });
            }
        }
    }

    fn skip_remaining(&self, run: &mut PipelineRun) {
        for name in run.execution_order().to_vec() {
            if let Some(job) = run.job_mut(&name) {
                if !job.state.is_terminal() {
                    job.state = JobState::Skipped {
                        reason: SkipReason::Cancelled,
                    };
                    self.emit(RunEvent::JobSkipped {
                        job: name,
                        reason: SkipReason::Cancelled,
                    });
                }
            }
        }
    }

    /// Run one scheduling wave. Members execute concurrently as tasks;
    /// the wave is drained before the next round is scheduled.
    async fn run_batch(&self, run: &mut PipelineRun, batch: &[String]) -> anyhow::Result<()> {
        let mut tasks: JoinSet<(String, DateTime<Utc>, Result<(), JobFailure>)> = JoinSet::new();

        for job_name in batch {
            let Some(job_run) = run.job(job_name) else { continue };
            let job = job_run.job.clone();

            let started_at = Utc::now();
            if let Some(job_run) = run.job_mut(job_name) {
                job_run.state = JobState::Running { started_at };
            }
            self.emit(RunEvent::JobStarted {
                job: job_name.clone(),
            });

            let sandbox = match self.prepare_sandbox(run, job_name) {
                Ok(sandbox) => sandbox,
                Err(err) => {
                    self.fail_job(
                        run,
                        job_name,
                        "prepare sandbox",
                        err.to_string(),
                        String::new(),
                        started_at,
                    );
                    continue;
                }
            };

            let runner = self.runner.clone();
            let handlers = self.event_handlers.clone();
            let name = job_name.clone();
            tasks.spawn(async move {
                for step in &job.steps {
                    let label = step.label();
                    emit_all(
                        &handlers,
                        RunEvent::StepStarted {
                            job: name.clone(),
                            step: label.clone(),
                        },
                    );

                    if let StepOutcome::Failure { error, output } =
                        runner.execute(&job, step, &sandbox).await
                    {
                        return (
                            name,
                            started_at,
                            Err(JobFailure {
                                step: label,
                                error,
                                output,
                            }),
                        );
                    }
                }
                (name, started_at, Ok(()))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (name, started_at, result) =
                joined.map_err(|err| anyhow::anyhow!("job task failed: {}", err))?;
            match result {
                Ok(()) => {
                    if let Some(job_run) = run.job_mut(&name) {
                        job_run.state = JobState::Succeeded {
                            started_at,
                            finished_at: Utc::now(),
                        };
                    }
                    info!(job = %name, "job succeeded");
                    self.emit(RunEvent::JobSucceeded { job: name });
                }
                Err(failure) => self.fail_job(
                    run,
                    &name,
                    &failure.step,
                    failure.error,
                    failure.output,
                    started_at,
                ),
            }
        }

        Ok(())
    }

    fn fail_job(
        &self,
        run: &mut PipelineRun,
        job_name: &str,
        step: &str,
        error: String,
        output: String,
        started_at: DateTime<Utc>,
    ) {
        error!(job = %job_name, step, %error, "job failed");
        if let Some(job_run) = run.job_mut(job_name) {
            job_run.state = JobState::Failed {
                step: step.to_string(),
                error: error.clone(),
                output,
                started_at,
                failed_at: Utc::now(),
            };
        }
        self.emit(RunEvent::JobFailed {
            job: job_name.to_string(),
            step: step.to_string(),
            error,
        });
    }

    /// Create the per-job working directory and assemble its environment.
    fn prepare_sandbox(&self, run: &PipelineRun, job_name: &str) -> std::io::Result<JobSandbox> {
        let workdir = self
            .workspace_root
            .join(run.state.run_id.to_string())
            .join(job_name);
        std::fs::create_dir_all(&workdir)?;

        let mut env = HashMap::new();
        if let Some(job_run) = run.job(job_name) {
            env.extend(job_run.job.environment.clone());

            // Secrets come from the host environment; values are never logged
            for name in &job_run.job.secrets {
                if let Ok(value) = std::env::var(name) {
                    env.insert(name.clone(), value);
                } else {
                    warn!(job = %job_name, secret = %name, "secret not set in host environment");
                }
            }
        }
        env.extend(self.extra_env.clone());

        env.insert("CONVEYOR_WORKFLOW".to_string(), run.workflow.clone());
        env.insert("CONVEYOR_JOB".to_string(), job_name.to_string());
        match &run.trigger.reference {
            TriggerRef::Branch(name) => {
                env.insert("CONVEYOR_BRANCH".to_string(), name.clone());
            }
            TriggerRef::Tag(name) => {
                env.insert("CONVEYOR_TAG".to_string(), name.clone());
            }
        }

        Ok(JobSandbox {
            workdir,
            env,
            source: run.trigger.source.clone(),
        })
    }

    /// Remove the run's sandbox directories. The cache store is the
    /// cross-run surface; sandboxes are per-run scratch space.
    fn cleanup_workspace(&self, run: &PipelineRun) {
        if self.keep_workspace {
            return;
        }
        let run_dir = self.workspace_root.join(run.state.run_id.to_string());
        if run_dir.exists() {
            if let Err(err) = std::fs::remove_dir_all(&run_dir) {
                warn!(dir = %run_dir.display(), %err, "failed to remove run workspace");
            }
        }
    }
}

fn emit_all(handlers: &Mutex<Vec<EventHandler>>, event: RunEvent) {
    if let Ok(handlers) = handlers.lock() {
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}
