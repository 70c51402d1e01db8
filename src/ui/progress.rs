//! Terminal status display for pipeline runs.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::coordinator::IterationReport;
use crate::state::store::PipelineState;
use crate::state::task::TaskStatus;

/// Spinner plus iteration summaries, for interactive runs.
pub struct StatusDisplay {
    spinner: ProgressBar,
}

impl StatusDisplay {
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        Self { spinner }
    }

    /// Hidden display for non-interactive runs.
    pub fn hidden() -> Self {
        Self {
            spinner: ProgressBar::hidden(),
        }
    }

    pub fn iteration(&self, iteration: u64, report: &IterationReport) {
        match report {
            IterationReport::Idle => {
                self.spinner.set_message(format!("iteration {iteration}: idle"));
            }
            IterationReport::Ran {
                phase,
                task_id,
                success,
                ..
            } => {
                let mark = if *success { "ok" } else { "failed" };
                self.spinner.set_message(format!(
                    "iteration {iteration}: {phase} on {task_id} ({mark})"
                ));
            }
        }
    }

    pub fn finish(&self, state: &PipelineState) {
        self.spinner.finish_and_clear();
        print_summary(state);
    }
}

impl Default for StatusDisplay {
    fn default() -> Self {
        Self::new()
    }
}

/// Print the run summary: task counts by status and objective progress.
pub fn print_summary(state: &PipelineState) {
    println!("{}", style("Pipeline summary").bold());
    println!("  run {} after {} iterations", state.run_id, state.iteration);
    for (status, count) in state.status_counts() {
        let line = format!("  {:12} {}", status, count);
        if status == TaskStatus::Failed.to_string() || status == TaskStatus::Skipped.to_string() {
            println!("{}", style(line).yellow());
        } else {
            println!("{line}");
        }
    }
    for (kind, stats) in &state.phase_stats {
        if stats.runs > 0 {
            println!(
                "  phase {:14} {} runs, {:.0}% recent success",
                kind.to_string(),
                stats.runs,
                stats.recent_success_rate(10) * 100.0
            );
        }
    }
    for objective in state.objectives.values() {
        println!(
            "  objective {} [{}] {:.0}%",
            objective.id,
            objective.status,
            objective.completion_percentage
        );
    }
    for task in state.tasks.values() {
        if let Some(reason) = &task.skip_reason {
            println!("{}", style(format!("  skipped {}: {}", task.id, reason)).dim());
        }
    }
}
