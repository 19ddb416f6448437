use crate::model::{OutcomePolicy, StepStatus, ValidationStep};
use rand::Rng;
use time::OffsetDateTime;

/// Next progress value for a step: `min(100, current + increment)` with the
/// increment drawn uniformly from `(0, max_increment]`.
pub fn next_progress<R: Rng>(current: f64, max_increment: f64, rng: &mut R) -> f64 {
    // gen_range yields [0, max); flipping it gives (0, max].
    let increment = max_increment - rng.gen_range(0.0..max_increment);
    (current + increment).min(100.0)
}

/// Drives a single step from 0 to 100 and assigns its simulated outcome.
pub struct StepSimulator<R> {
    rng: R,
    policy: OutcomePolicy,
}

impl<R: Rng> StepSimulator<R> {
    pub fn new(rng: R, policy: OutcomePolicy) -> Self {
        Self { rng, policy }
    }

    /// Move a running step forward by one tick. Returns true once the step
    /// has reached 100 and needs to be finalized.
    pub fn advance(&mut self, step: &mut ValidationStep) -> bool {
        if step.status != StepStatus::Running {
            return false;
        }
        step.progress = next_progress(step.progress, self.policy.max_increment, &mut self.rng);
        step.records_processed = step.project_records();
        step.progress >= 100.0
    }

    /// Assign a terminal status plus diagnostics. Only applies to a running
    /// step at 100; anything else is left untouched.
    pub fn finalize(&mut self, step: &mut ValidationStep) {
        if step.status != StepStatus::Running || step.progress < 100.0 {
            return;
        }

        let failed = self.rng.gen_bool(self.policy.fail_rate);
        let warned = self.rng.gen_bool(self.policy.warning_rate);

        step.progress = 100.0;
        step.records_processed = step.total_records;
        step.status = if failed {
            StepStatus::Failed
        } else {
            StepStatus::Completed
        };
        if warned {
            let msg = warning_message(step);
            step.warnings.push(msg);
        }
        if failed {
            let msg = error_message(step);
            step.errors.push(msg);
        }
        step.end_time = Some(OffsetDateTime::now_utc());
    }
}

fn warning_message(step: &ValidationStep) -> String {
    match step.total_records {
        Some(total) => format!("{}: {} records flagged for manual review", step.name, total / 100),
        None => format!("{}: completed with warnings", step.name),
    }
}

fn error_message(step: &ValidationStep) -> String {
    match step.total_records {
        Some(total) => format!(
            "{}: source and target disagree on {} of {} records",
            step.name,
            (total / 1000).max(1),
            total
        ),
        None => format!("{}: check did not pass", step.name),
    }
}
