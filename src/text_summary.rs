//! Text rendering for CLI output.
//!
//! Formats progress lines while a run is live and the summary once it ends.

use crate::metrics::{self, RunStats};
use crate::model::{RunEvent, RunStatus, StepStatus, ValidationRun};
use time::format_description::well_known::Rfc3339;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Render one event as a progress line, or nothing for events with no text form.
pub(crate) fn event_line(ev: &RunEvent, run: &ValidationRun) -> Option<String> {
    let line = match ev {
        RunEvent::RunStarted {
            run_id,
            estimated_completion,
        } => {
            let etc = estimated_completion
                .and_then(|t| t.format(&Rfc3339).ok())
                .unwrap_or_else(|| "-".into());
            format!("Run {run_id} started (ETC {etc})")
        }
        RunEvent::StepStarted { index, name, .. } => {
            format!("== [{}/{}] {name} ==", index + 1, run.total_steps)
        }
        RunEvent::StepProgress {
            index,
            progress,
            records_processed,
            overall_progress,
        } => {
            let step = run.steps.get(*index)?;
            let records = match (records_processed, step.total_records) {
                (Some(done), Some(total)) => {
                    format!(" ({} / {} records)", group_thousands(*done), group_thousands(total))
                }
                _ => String::new(),
            };
            format!(
                "{}: {progress:.1}%{records} | overall {overall_progress:.1}%",
                step.name
            )
        }
        RunEvent::StepFinished {
            index,
            status,
            warnings,
            errors,
            overall_progress,
            ..
        } => {
            let name = run.steps.get(*index).map(|s| s.name.as_str()).unwrap_or("?");
            let mut line = format!(
                "{name}: {} | overall {overall_progress:.1}%",
                status.label()
            );
            if !warnings.is_empty() {
                line.push_str(&format!(" | warnings: {}", warnings.join(", ")));
            }
            if !errors.is_empty() {
                line.push_str(&format!(" | errors: {}", errors.join(", ")));
            }
            line
        }
        RunEvent::Paused => "Paused".to_string(),
        RunEvent::Resumed => "Resumed".to_string(),
        RunEvent::Stopped { overall_progress } => {
            format!("Stopped at {overall_progress:.1}%")
        }
        RunEvent::RunCompleted { .. } => return None,
        RunEvent::Info(msg) => msg.clone(),
    };
    Some(line)
}

/// Build the end-of-run summary.
pub(crate) fn build_text_summary(run: &ValidationRun) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!(
        "Run {}: {} ({} / {} steps, {:.1}%)",
        run.id,
        run.status.label(),
        run.completed_steps,
        run.total_steps,
        run.overall_progress
    ));
    if let Some(start) = run.start_time.and_then(|t| t.format(&Rfc3339).ok()) {
        lines.push(format!("Started: {start}"));
    }

    for (i, step) in run.steps.iter().enumerate() {
        let mut line = format!("{:>2}. {:<26} {:<9}", i + 1, step.name, step.status.label());
        match step.status {
            StepStatus::Pending => {}
            StepStatus::Running => {
                line.push_str(&format!(" {:.1}% (abandoned)", step.progress));
            }
            _ => {
                line.push_str(&format!(" {:>7}", step.duration_label()));
                if let Some(done) = step.records_processed {
                    line.push_str(&format!(" {} records processed", group_thousands(done)));
                }
            }
        }
        lines.push(line);
        for w in &step.warnings {
            lines.push(format!("      warning: {w}"));
        }
        for e in &step.errors {
            lines.push(format!("      error: {e}"));
        }
    }

    let stats = RunStats::from_run(run);
    lines.push(format!(
        "Records processed: {} | completed: {} | failed: {} | warnings: {} | errors: {}",
        group_thousands(stats.records_processed),
        stats.steps_completed,
        stats.steps_failed,
        stats.warnings,
        stats.errors
    ));

    let durations = metrics::finished_step_durations(run);
    if let Some((mean, median, p25, p75)) = metrics::compute_duration_metrics(&durations) {
        lines.push(format!(
            "Step duration: avg {mean:.1}s med {median:.1}s p25 {p25:.1}s p75 {p75:.1}s"
        ));
    }

    if run.status == RunStatus::Failed {
        lines.push("Run was stopped before all steps finished.".to_string());
    }

    TextSummary { lines }
}

/// `57000` -> `57,000`.
pub(crate) fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
