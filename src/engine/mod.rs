//! Validation run state machine.
//!
//! `RunController` owns one run: it sequences steps in order, keeps at most one
//! step advancing, aggregates progress and applies lifecycle commands. Time is
//! supplied from outside through `tick`.

pub mod simulator;

use crate::model::{RunStatus, StepStatus, StepTemplate, ValidationRun};
use rand::Rng;
use simulator::StepSimulator;
use std::time::Duration;
use time::OffsetDateTime;

/// Lifecycle operations accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOp {
    Start,
    Pause,
    Resume,
    Stop,
}

impl std::fmt::Display for RunOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunOp::Start => "start",
            RunOp::Pause => "pause",
            RunOp::Resume => "resume",
            RunOp::Stop => "stop",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {op} a run that is {}", .from.label().to_lowercase())]
    InvalidTransition { op: RunOp, from: RunStatus },
}

/// What a single tick did to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Run not running (not started, paused or terminal); nothing changed.
    Idle,
    StepStarted { index: usize },
    Progressed { index: usize },
    StepFinished { index: usize, status: StepStatus },
    /// The last step finished on this tick and the run is now completed.
    RunCompleted { index: usize, status: StepStatus },
}

pub struct RunController<R> {
    run: ValidationRun,
    simulator: StepSimulator<R>,
    eta_offset: Duration,
    /// Index of the step currently `running`, if any.
    active: Option<usize>,
    /// Index of the next step to begin once `active` is terminal.
    next: usize,
}

impl<R: Rng> RunController<R> {
    pub fn new(
        run_id: impl Into<String>,
        templates: &[StepTemplate],
        simulator: StepSimulator<R>,
        eta_offset: Duration,
    ) -> Self {
        Self {
            run: ValidationRun::new(run_id, templates),
            simulator,
            eta_offset,
            active: None,
            next: 0,
        }
    }

    pub fn run(&self) -> &ValidationRun {
        &self.run
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    /// Copy of the current state for observers.
    pub fn snapshot(&self) -> ValidationRun {
        self.run.clone()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.expect(RunOp::Start, &[RunStatus::NotStarted])?;

        let now = OffsetDateTime::now_utc();
        self.run.status = RunStatus::Running;
        self.run.start_time = Some(now);
        // An offset past the calendar range leaves the estimate unset.
        self.run.estimated_completion = time::Duration::try_from(self.eta_offset)
            .ok()
            .and_then(|offset| now.checked_add(offset));
        tracing::info!(run_id = %self.run.id, steps = self.run.total_steps, "run started");

        if self.run.steps.is_empty() {
            self.complete();
        } else {
            self.begin_next_step();
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), TransitionError> {
        self.expect(RunOp::Pause, &[RunStatus::Running])?;
        self.run.status = RunStatus::Paused;
        tracing::info!(run_id = %self.run.id, progress = self.run.overall_progress, "run paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), TransitionError> {
        self.expect(RunOp::Resume, &[RunStatus::Paused])?;
        self.run.status = RunStatus::Running;
        tracing::info!(run_id = %self.run.id, "run resumed");
        Ok(())
    }

    /// Abort the run. The active step keeps its last progress and receives no
    /// further transitions.
    pub fn stop(&mut self) -> Result<(), TransitionError> {
        self.expect(RunOp::Stop, &[RunStatus::Running, RunStatus::Paused])?;
        self.run.status = RunStatus::Failed;
        tracing::info!(
            run_id = %self.run.id,
            progress = self.run.overall_progress,
            active_step = ?self.active,
            "run stopped"
        );
        Ok(())
    }

    /// Advance the run by one scheduling step.
    pub fn tick(&mut self) -> TickOutcome {
        if self.run.status != RunStatus::Running {
            return TickOutcome::Idle;
        }

        let Some(index) = self.active else {
            return match self.begin_next_step() {
                Some(index) => TickOutcome::StepStarted { index },
                None => TickOutcome::Idle,
            };
        };

        let step = &mut self.run.steps[index];
        if !self.simulator.advance(step) {
            self.refresh_progress();
            return TickOutcome::Progressed { index };
        }

        self.simulator.finalize(step);
        let status = step.status;
        tracing::debug!(
            step_id = %step.id,
            status = status.label(),
            warnings = step.warnings.len(),
            errors = step.errors.len(),
            "step finished"
        );
        self.active = None;
        self.run.completed_steps += 1;

        if self.next >= self.run.steps.len() {
            self.complete();
            TickOutcome::RunCompleted { index, status }
        } else {
            self.refresh_progress();
            TickOutcome::StepFinished { index, status }
        }
    }

    fn expect(&self, op: RunOp, allowed: &[RunStatus]) -> Result<(), TransitionError> {
        if allowed.contains(&self.run.status) {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                op,
                from: self.run.status,
            })
        }
    }

    fn begin_next_step(&mut self) -> Option<usize> {
        // A second running step would break sequencing.
        assert!(self.active.is_none(), "a step is already running");

        let index = self.next;
        let step = self.run.steps.get_mut(index)?;
        step.status = StepStatus::Running;
        step.start_time = Some(OffsetDateTime::now_utc());
        step.records_processed = step.project_records();
        tracing::debug!(step_id = %step.id, index, "step started");

        self.active = Some(index);
        self.next += 1;
        self.refresh_progress();
        Some(index)
    }

    fn refresh_progress(&mut self) {
        let total = self.run.steps.len();
        if total == 0 {
            return;
        }
        let current = self
            .active
            .map(|i| self.run.steps[i].progress)
            .unwrap_or(0.0);
        // Same as (completed/total)*100 + (current/100)*(100/total); a single
        // division keeps it monotone under rounding.
        let overall = (self.run.completed_steps as f64 * 100.0 + current) / total as f64;
        // The sum can round up to exactly 100 while the last step is still
        // running; 100 is reserved for a completed run.
        self.run.overall_progress = if self.active.is_some() {
            overall.min(below_complete())
        } else {
            overall
        };
    }

    fn complete(&mut self) {
        self.run.status = RunStatus::Completed;
        self.run.overall_progress = 100.0;
        self.run.completed_steps = self.run.steps.len();
        tracing::info!(run_id = %self.run.id, "run completed");
    }
}

/// Largest progress value short of a completed run.
fn below_complete() -> f64 {
    f64::from_bits(100.0_f64.to_bits() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutcomePolicy;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn templates(n: usize, total: Option<u64>) -> Vec<StepTemplate> {
        (0..n)
            .map(|i| StepTemplate::new(&format!("step-{i}"), &format!("Step {i}"), "", total))
            .collect()
    }

    fn controller(n: usize, seed: u64) -> RunController<StdRng> {
        controller_with(n, seed, OutcomePolicy::default())
    }

    fn controller_with(n: usize, seed: u64, policy: OutcomePolicy) -> RunController<StdRng> {
        let sim = StepSimulator::new(StdRng::seed_from_u64(seed), policy);
        RunController::new("run-test", &templates(n, Some(100)), sim, Duration::from_secs(900))
    }

    fn running_count(run: &ValidationRun) -> usize {
        run.steps
            .iter()
            .filter(|s| s.status == StepStatus::Running)
            .count()
    }

    /// Tick until the run leaves `running`, collecting a snapshot after each tick.
    fn drain(ctl: &mut RunController<StdRng>) -> Vec<ValidationRun> {
        let mut snaps = Vec::new();
        for _ in 0..10_000 {
            if ctl.tick() == TickOutcome::Idle {
                break;
            }
            snaps.push(ctl.snapshot());
        }
        snaps
    }

    #[test]
    fn three_step_run_completes_regardless_of_outcomes() {
        for seed in 0..20 {
            let mut ctl = controller(3, seed);
            ctl.start().unwrap();
            drain(&mut ctl);

            let run = ctl.run();
            assert_eq!(run.status, RunStatus::Completed);
            assert_eq!(run.completed_steps, 3);
            assert_eq!(run.overall_progress, 100.0);
            assert!(run.steps.iter().all(|s| s.status.is_terminal()));
        }
    }

    #[test]
    fn overall_progress_never_decreases() {
        let mut ctl = controller(4, 11);
        ctl.start().unwrap();
        let mut last = ctl.run().overall_progress;
        for snap in drain(&mut ctl) {
            assert!(snap.overall_progress >= last);
            last = snap.overall_progress;
        }
    }

    #[test]
    fn hundred_percent_only_when_completed() {
        let mut ctl = controller(5, 5);
        ctl.start().unwrap();
        for snap in drain(&mut ctl) {
            assert_eq!(
                snap.overall_progress == 100.0,
                snap.status == RunStatus::Completed
            );
        }
    }

    #[test]
    fn aggregation_matches_formula() {
        let mut ctl = controller(4, 21);
        ctl.start().unwrap();
        for snap in drain(&mut ctl) {
            if snap.status == RunStatus::Completed {
                continue;
            }
            let done = snap.steps.iter().filter(|s| s.status.is_terminal()).count() as f64;
            let current = snap
                .steps
                .iter()
                .find(|s| s.status == StepStatus::Running)
                .map(|s| s.progress)
                .unwrap_or(0.0);
            let expected = (done / 4.0) * 100.0 + (current / 100.0) * (100.0 / 4.0);
            assert!((snap.overall_progress - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn at_most_one_step_running() {
        let mut ctl = controller(6, 3);
        ctl.start().unwrap();
        assert_eq!(running_count(ctl.run()), 1);
        for snap in drain(&mut ctl) {
            assert!(running_count(&snap) <= 1);
        }
    }

    #[test]
    fn steps_finish_in_order() {
        let mut ctl = controller(5, 8);
        ctl.start().unwrap();
        for snap in drain(&mut ctl) {
            for pair in snap.steps.windows(2) {
                if pair[1].status != StepStatus::Pending {
                    assert!(pair[0].status.is_terminal());
                }
            }
        }
    }

    #[test]
    fn terminal_steps_report_all_records() {
        let mut ctl = controller(3, 13);
        ctl.start().unwrap();
        for snap in drain(&mut ctl) {
            for step in snap.steps.iter().filter(|s| s.status.is_terminal()) {
                assert_eq!(step.records_processed, step.total_records);
                assert_eq!(step.progress, 100.0);
                assert!(step.end_time.is_some());
            }
        }
    }

    #[test]
    fn failed_step_does_not_stop_the_run() {
        let policy = OutcomePolicy {
            fail_rate: 1.0,
            ..OutcomePolicy::default()
        };
        let mut ctl = controller_with(3, 2, policy);
        ctl.start().unwrap();
        drain(&mut ctl);
        assert_eq!(ctl.status(), RunStatus::Completed);
        assert!(ctl.run().steps.iter().all(|s| s.status == StepStatus::Failed));
        assert!(ctl.run().steps.iter().all(|s| s.errors.len() == 1));
    }

    #[test]
    fn pause_freezes_progress_and_resume_continues() {
        let mut ctl = controller(3, 17);
        ctl.start().unwrap();
        ctl.tick();
        ctl.tick();
        let index = ctl.active_index().unwrap();
        let paused_at = ctl.run().steps[index].progress;
        assert!(paused_at > 0.0);

        ctl.pause().unwrap();
        for _ in 0..5 {
            assert_eq!(ctl.tick(), TickOutcome::Idle);
        }
        assert_eq!(ctl.run().steps[index].progress, paused_at);
        assert_eq!(ctl.status(), RunStatus::Paused);

        ctl.resume().unwrap();
        ctl.tick();
        let step = &ctl.run().steps[index];
        assert!(step.progress > paused_at || step.status.is_terminal());
    }

    #[test]
    fn stop_fails_run_and_freezes_steps() {
        let mut ctl = controller(3, 19);
        ctl.start().unwrap();
        ctl.tick();
        ctl.stop().unwrap();
        assert_eq!(ctl.status(), RunStatus::Failed);

        let frozen = ctl.snapshot();
        for _ in 0..10 {
            assert_eq!(ctl.tick(), TickOutcome::Idle);
        }
        assert_eq!(ctl.snapshot(), frozen);
        assert_eq!(frozen.steps[0].status, StepStatus::Running);
        assert!(frozen.steps[0].end_time.is_none());
    }

    #[test]
    fn stop_while_paused_is_allowed() {
        let mut ctl = controller(2, 1);
        ctl.start().unwrap();
        ctl.pause().unwrap();
        ctl.stop().unwrap();
        assert_eq!(ctl.status(), RunStatus::Failed);
    }

    #[test]
    fn second_start_is_rejected_without_side_effects() {
        let mut ctl = controller(3, 23);
        ctl.start().unwrap();
        let first = ctl.snapshot();
        let err = ctl.start().unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                op: RunOp::Start,
                from: RunStatus::Running
            }
        );
        assert_eq!(ctl.snapshot(), first);
    }

    #[test]
    fn invalid_commands_leave_state_untouched() {
        let mut ctl = controller(2, 29);
        assert!(ctl.pause().is_err());
        assert!(ctl.resume().is_err());
        assert!(ctl.stop().is_err());
        assert_eq!(ctl.status(), RunStatus::NotStarted);
        assert_eq!(ctl.tick(), TickOutcome::Idle);

        ctl.start().unwrap();
        assert!(ctl.resume().is_err());
        drain(&mut ctl);
        assert!(ctl.stop().is_err());
        assert_eq!(ctl.status(), RunStatus::Completed);
    }

    #[test]
    fn start_sets_timestamps_and_eta() {
        let mut ctl = controller(1, 31);
        ctl.start().unwrap();
        let run = ctl.run();
        let start = run.start_time.unwrap();
        let eta = run.estimated_completion.unwrap();
        assert_eq!(eta - start, time::Duration::seconds(900));
        assert!(run.steps[0].start_time.is_some());
    }

    #[test]
    fn next_step_starts_on_the_tick_after_a_finish() {
        let mut ctl = controller(2, 37);
        ctl.start().unwrap();
        loop {
            match ctl.tick() {
                TickOutcome::StepFinished { index, .. } => {
                    assert_eq!(index, 0);
                    break;
                }
                TickOutcome::Progressed { .. } => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(ctl.active_index(), None);
        assert_eq!(ctl.run().steps[1].status, StepStatus::Pending);
        assert_eq!(ctl.run().overall_progress, 50.0);
        assert_eq!(ctl.tick(), TickOutcome::StepStarted { index: 1 });
    }

    #[test]
    fn empty_plan_completes_on_start() {
        let sim = StepSimulator::new(StdRng::seed_from_u64(0), OutcomePolicy::default());
        let mut ctl = RunController::new("run-empty", &[], sim, Duration::from_secs(1));
        ctl.start().unwrap();
        assert_eq!(ctl.status(), RunStatus::Completed);
        assert_eq!(ctl.run().overall_progress, 100.0);
    }

    #[test]
    fn last_step_near_full_stays_below_complete() {
        let mut ctl = controller(3, 41);
        ctl.start().unwrap();
        for index in 0..2 {
            ctl.run.steps[index].status = StepStatus::Completed;
            ctl.run.steps[index].progress = 100.0;
        }
        ctl.run.steps[2].status = StepStatus::Running;
        ctl.run.steps[2].progress = below_complete();
        ctl.run.completed_steps = 2;
        ctl.active = Some(2);
        ctl.next = 3;

        ctl.refresh_progress();
        assert!(ctl.run().overall_progress < 100.0);
        assert_eq!(ctl.status(), RunStatus::Running);
    }

    #[test]
    fn eta_past_calendar_range_is_left_unset() {
        let sim = StepSimulator::new(StdRng::seed_from_u64(0), OutcomePolicy::default());
        let mut ctl = RunController::new(
            "run-far",
            &templates(1, None),
            sim,
            Duration::from_secs(20_000 * 365 * 24 * 3600),
        );
        ctl.start().unwrap();
        assert_eq!(ctl.status(), RunStatus::Running);
        assert!(ctl.run().start_time.is_some());
        assert!(ctl.run().estimated_completion.is_none());
    }

    #[test]
    fn transition_error_message_names_state() {
        let err = TransitionError::InvalidTransition {
            op: RunOp::Resume,
            from: RunStatus::NotStarted,
        };
        assert_eq!(err.to_string(), "cannot resume a run that is not started");
    }
}
