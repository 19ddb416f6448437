use crate::model::{StepStatus, ValidationRun};

/// Totals reported in the end-of-run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub records_processed: u64,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub warnings: usize,
    pub errors: usize,
}

impl RunStats {
    pub fn from_run(run: &ValidationRun) -> Self {
        run.steps.iter().fold(Self::default(), |mut acc, step| {
            acc.records_processed += step.records_processed.unwrap_or(0);
            match step.status {
                StepStatus::Completed => acc.steps_completed += 1,
                StepStatus::Failed => acc.steps_failed += 1,
                _ => {}
            }
            acc.warnings += step.warnings.len();
            acc.errors += step.errors.len();
            acc
        })
    }
}

/// Compute (mean, median, 25th percentile, 75th percentile) of step durations in seconds.
pub fn compute_duration_metrics(samples: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let median = sorted[n / 2];
    let p25 = sorted[n / 4];
    let p75 = sorted[3 * n / 4];
    Some((mean, median, p25, p75))
}

/// Durations of every step that reached a terminal status.
pub fn finished_step_durations(run: &ValidationRun) -> Vec<f64> {
    run.steps
        .iter()
        .filter(|s| s.status.is_terminal())
        .filter_map(|s| s.duration())
        .map(|d| d.as_secs_f64())
        .collect()
}
