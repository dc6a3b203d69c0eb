//! CLI output formatting

use crate::core::RunStatus;
use crate::execution::{JobOutcome, RunEvent, RunReport};
use crate::persistence::RunSummary;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar over the run's jobs
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_run_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a job outcome for display
pub fn format_job_outcome(outcome: JobOutcome) -> String {
    match outcome {
        JobOutcome::Pending => style("PENDING").dim().to_string(),
        JobOutcome::Running => style("RUNNING").yellow().to_string(),
        JobOutcome::Succeeded => style("SUCCEEDED").green().to_string(),
        JobOutcome::Failed => style("FAILED").red().to_string(),
        JobOutcome::Skipped => style("SKIPPED").dim().to_string(),
    }
}

/// Format a run summary line for history listings
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Cancelled => WARN,
        RunStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} - {} - {} ({} ok, {} failed, {} skipped)",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.workflow).bold(),
        style(&summary.trigger).cyan(),
        format_run_status(summary.status),
        style(summary.succeeded_jobs).green(),
        style(summary.failed_jobs).red(),
        style(summary.skipped_jobs).dim(),
    )
}

/// Format a run event for console output
pub fn format_run_event(event: &RunEvent) -> String {
    match event {
        RunEvent::RunStarted {
            run_id,
            workflow,
            trigger,
        } => format!(
            "{} Starting workflow {} for {} ({})",
            ROCKET,
            style(workflow).bold(),
            style(trigger).cyan(),
            style(&run_id.to_string()[..8]).dim()
        ),
        RunEvent::JobStarted { job } => {
            format!("{} {}", SPINNER, style(job).cyan())
        }
        RunEvent::StepStarted { job, step } => {
            format!("   {} {} {}", style("->").dim(), style(job).dim(), step)
        }
        RunEvent::JobSucceeded { job } => {
            format!("{} {}", CHECK, style(job).green())
        }
        RunEvent::JobFailed { job, step, error } => format!(
            "{} {} at {}: {}",
            CROSS,
            style(job).red(),
            style(step).bold(),
            style(error).dim()
        ),
        RunEvent::JobSkipped { job, reason } => {
            format!("{} {} ({})", SKIP, style(job).dim(), reason)
        }
        RunEvent::RunCompleted { run_id, status } => format!(
            "{} Run ({}) {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_run_status(*status)
        ),
    }
}

/// Lines of captured output shown for a failed job before truncation
const FAILURE_OUTPUT_LINES: usize = 20;

/// Format the final report as a job table. Failed jobs include their
/// captured step output, truncated.
pub fn format_report(report: &RunReport) -> String {
    let mut lines = Vec::new();
    for job in &report.jobs {
        let mut line = format!("  {} {}", style(&job.name).bold(), format_job_outcome(job.outcome));
        if let Some(reason) = &job.skip_reason {
            line.push_str(&format!(" ({})", style(reason).dim()));
        }
        if let Some(step) = &job.failed_step {
            line.push_str(&format!(" at {}", style(step).red()));
        }
        lines.push(line);

        if job.outcome == JobOutcome::Failed {
            if let Some(output) = job.output.as_deref().filter(|o| !o.trim().is_empty()) {
                for output_line in format_output(output, FAILURE_OUTPUT_LINES).lines() {
                    lines.push(format!("      {}", style(output_line).dim()));
                }
            }
        }
    }
    lines.join("\n")
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{} ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::JobReport;
    use crate::core::RunStatus;
    use uuid::Uuid;

    fn job_report(name: &str, outcome: JobOutcome) -> JobReport {
        JobReport {
            name: name.to_string(),
            outcome,
            skip_reason: None,
            failed_step: None,
            error: None,
            output: None,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_report_shows_failed_job_output() {
        let mut failed = job_report("build", JobOutcome::Failed);
        failed.failed_step = Some("compile".to_string());
        failed.error = Some("command exited with code 1".to_string());
        failed.output = Some("error[E0432]: unresolved import\nsee above".to_string());

        let report = RunReport {
            run_id: Uuid::new_v4(),
            workflow: "main".to_string(),
            trigger: "branch main".to_string(),
            status: RunStatus::Failed,
            jobs: vec![failed, job_report("deploy", JobOutcome::Skipped)],
        };

        let rendered = format_report(&report);
        assert!(rendered.contains("unresolved import"));
        assert!(rendered.contains("see above"));
    }

    #[test]
    fn test_report_omits_output_for_succeeded_jobs() {
        let mut ok = job_report("build", JobOutcome::Succeeded);
        ok.output = Some("lots of build noise".to_string());

        let report = RunReport {
            run_id: Uuid::new_v4(),
            workflow: "main".to_string(),
            trigger: "branch main".to_string(),
            status: RunStatus::Succeeded,
            jobs: vec![ok],
        };

        assert!(!format_report(&report).contains("build noise"));
    }

    #[test]
    fn test_progress_bar_tracks_job_count() {
        let progress = create_progress_bar(3);
        assert_eq!(progress.length(), Some(3));

        progress.inc(1);
        assert_eq!(progress.position(), 1);
        progress.finish_and_clear();
    }

    #[test]
    fn test_format_output_truncates() {
        let output = "a\nb\nc\nd\ne";
        let formatted = format_output(output, 2);
        assert!(formatted.starts_with("a\nb\n"));
        assert!(formatted.contains("3 more lines"));
    }

    #[test]
    fn test_format_output_short_is_untouched() {
        assert_eq!(format_output("a\nb", 5), "a\nb");
    }
}
