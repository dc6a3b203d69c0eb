use anyhow::{Context, Result};
use conveyor::cache::{CacheStore, DirCacheStore, InMemoryCacheStore};
use conveyor::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use conveyor::cli::output::*;
use conveyor::cli::{Cli, Command};
use conveyor::core::config::PipelineConfig;
use conveyor::core::{JobGraph, PipelineRun, Trigger};
use conveyor::execution::{RunEvent, SchedulingStrategy, WorkflowEngine};
use conveyor::persistence::{create_summary, HistoryBackend, RunSummary};
use conveyor::shell::ShellRunner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

#[cfg(feature = "sqlite")]
use conveyor::persistence::SqliteRunStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd).await?,
        Command::Validate(cmd) => validate_config(cmd)?,
        Command::List(cmd) => list_workflows(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn open_history() -> Result<Arc<dyn HistoryBackend>> {
    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(SqliteRunStore::with_default_path().await?))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        warn!("built without sqlite; run history is not persisted");
        Ok(Arc::new(conveyor::persistence::InMemoryHistory::new()))
    }
}

async fn run_workflow(cmd: &RunCommand) -> Result<()> {
    let config =
        PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let workflow = config.select_workflow(cmd.workflow.as_deref())?.to_string();

    println!(
        "{} Loaded {} (workflow {})",
        INFO,
        style(&cmd.file).bold(),
        style(&workflow).cyan()
    );

    let mut trigger = match (&cmd.branch, &cmd.tag) {
        (_, Some(tag)) => Trigger::tag(tag),
        (Some(branch), None) => Trigger::branch(branch),
        (None, None) => Trigger::branch("main"),
    };
    if let Some(source) = &cmd.source {
        trigger = trigger.with_source(PathBuf::from(source));
    }

    let graph = JobGraph::from_config(&config, &workflow)?;
    let mut run = PipelineRun::new(&graph, trigger);

    let cache: Arc<dyn CacheStore> = match &cmd.cache_dir {
        Some(dir) => Arc::new(DirCacheStore::new(PathBuf::from(dir))),
        None => Arc::new(InMemoryCacheStore::new()),
    };

    let engine = WorkflowEngine::new(
        ShellRunner::default(),
        cache,
        SchedulingStrategy::from(cmd.strategy),
    )
    .with_env(cmd.env.iter().cloned().collect())
    .with_keep_workspace(cmd.keep_workspace);

    // Event lines print above the bar; the bar advances as jobs reach
    // a terminal state
    let progress = create_progress_bar(run.jobs.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        bar.println(format_run_event(&event));
        if matches!(
            event,
            RunEvent::JobSucceeded { .. }
                | RunEvent::JobFailed { .. }
                | RunEvent::JobSkipped { .. }
        ) {
            bar.inc(1);
        }
    });

    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    println!();
    let report = engine.execute(&mut run).await?;
    progress.finish_and_clear();

    if !cmd.no_history {
        let store = open_history().await?;
        let summary = create_summary(&run);
        store.save_run(&summary).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        );
    }

    if cmd.json {
        println!("\n{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n{}", format_report(&report));
    }

    if report.succeeded() {
        println!(
            "\n{} {} {}",
            CHECK,
            style(&workflow).bold(),
            style("succeeded").green()
        );
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&workflow).bold(),
            format_run_status(report.status)
        );
        std::process::exit(1);
    }

    Ok(())
}

fn validate_config(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating {}...", INFO, style(&cmd.file).bold());

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Configuration is valid", CHECK);
            println!("  Jobs: {}", style(config.jobs.len()).cyan());
            println!("  Workflows: {}", style(config.workflows.len()).cyan());
            for name in config.workflows.keys() {
                println!("    {}", style(name).bold());
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

async fn list_workflows(cmd: &ListCommand) -> Result<()> {
    let store = open_history().await?;
    let workflows = store.list_workflows().await?;

    if workflows.is_empty() {
        println!("{} No workflows found in history", INFO);
        return Ok(());
    }

    println!("{} Workflows in history:", INFO);

    for workflow in &workflows {
        let runs = store.list_runs(workflow).await?;

        if cmd.with_counts {
            let succeeded = runs
                .iter()
                .filter(|r| r.status == conveyor::RunStatus::Succeeded)
                .count();
            let failed = runs
                .iter()
                .filter(|r| r.status == conveyor::RunStatus::Failed)
                .count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(workflow).bold(),
                style(runs.len()).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(workflow).bold());
        }
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for workflow in &workflows {
            let runs = store.list_runs(workflow).await.ok();
            json_data.push(serde_json::json!({
                "name": workflow,
                "run_count": runs.as_ref().map(|r| r.len()).unwrap_or(0)
            }));
        }
        let data = serde_json::json!({ "workflows": json_data });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(run_id_str) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id_str).context("Invalid run ID format")?;

        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.detailed)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = if let Some(workflow) = &cmd.workflow {
        store
            .list_runs(workflow)
            .await?
            .into_iter()
            .take(cmd.limit)
            .collect()
    } else {
        let workflows = store.list_workflows().await?;
        let mut all_runs = Vec::new();
        for workflow in &workflows {
            all_runs.extend(store.list_runs(workflow).await?);
        }
        all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all_runs.into_iter().take(cmd.limit).collect::<Vec<_>>()
    };

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, detailed: bool) -> Result<()> {
    println!("{} Run details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Workflow: {}", style(&summary.workflow).bold());
    println!("  Trigger: {}", style(&summary.trigger).cyan());
    println!("  Status: {}", format_run_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(finished) = summary.finished_at {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
        if let Ok(duration) = finished.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Jobs: {} total, {} succeeded, {} failed, {} skipped",
        summary.total_jobs,
        style(summary.succeeded_jobs).green(),
        style(summary.failed_jobs).red(),
        style(summary.skipped_jobs).dim()
    );

    if detailed {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
