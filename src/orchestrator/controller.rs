//! Run lifecycle task.
//!
//! Single owner of a `RunController`: applies UI commands, drives ticks from its
//! own timer and emits events and snapshots for presentation layers.

use crate::engine::simulator::StepSimulator;
use crate::engine::{RunController, TickOutcome, TransitionError};
use crate::model::{RunConfig, RunEvent, RunStatus, ValidationRun};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Commands emitted by UI layers to control the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UiCommand {
    Start,
    Pause,
    Resume,
    Stop,
    Quit,
}

/// Handle for a spawned run task.
pub(crate) struct RunCtx {
    pub cmd_tx: UnboundedSender<UiCommand>,
    pub snapshot_rx: watch::Receiver<ValidationRun>,
    pub handle: tokio::task::JoinHandle<Result<ValidationRun>>,
}

/// Spawn the run task and return its control handle.
pub(crate) fn start_run(cfg: RunConfig, event_tx: UnboundedSender<RunEvent>) -> RunCtx {
    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel::<UiCommand>();
    let ctl = build_controller(&cfg);
    let (snapshot_tx, snapshot_rx) = watch::channel(ctl.snapshot());
    let timing = Timing::from(&cfg);
    let handle =
        tokio::spawn(async move { run_controller(ctl, timing, event_tx, cmd_rx, snapshot_tx).await });
    RunCtx {
        cmd_tx,
        snapshot_rx,
        handle,
    }
}

fn build_controller(cfg: &RunConfig) -> RunController<StdRng> {
    let rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let simulator = StepSimulator::new(rng, cfg.outcome);
    RunController::new(cfg.run_id.clone(), &cfg.steps, simulator, cfg.eta_offset)
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    tick_interval: Duration,
    step_gap: Duration,
}

impl From<&RunConfig> for Timing {
    fn from(cfg: &RunConfig) -> Self {
        Self {
            tick_interval: cfg.tick_interval,
            step_gap: cfg.step_gap,
        }
    }
}

/// Drive a run until it reaches a terminal status or the UI quits.
async fn run_controller<R: Rng>(
    mut ctl: RunController<R>,
    timing: Timing,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    snapshot_tx: watch::Sender<ValidationRun>,
) -> Result<ValidationRun> {
    // Deadline of the next tick; None while not running.
    let mut next_tick: Option<Instant> = None;

    loop {
        let deadline = next_tick;
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Start) => match ctl.start() {
                        Ok(()) => {
                            let run = ctl.run();
                            let _ = event_tx.send(RunEvent::RunStarted {
                                run_id: run.id.clone(),
                                estimated_completion: run.estimated_completion,
                            });
                            if let Some(index) = ctl.active_index() {
                                emit_step_started(&ctl, index, &event_tx);
                                next_tick = Some(Instant::now() + timing.tick_interval);
                            }
                        }
                        Err(e) => reject(e, &event_tx),
                    },
                    Some(UiCommand::Pause) => match ctl.pause() {
                        Ok(()) => {
                            next_tick = None;
                            let _ = event_tx.send(RunEvent::Paused);
                        }
                        Err(e) => reject(e, &event_tx),
                    },
                    Some(UiCommand::Resume) => match ctl.resume() {
                        Ok(()) => {
                            next_tick = Some(Instant::now() + timing.tick_interval);
                            let _ = event_tx.send(RunEvent::Resumed);
                        }
                        Err(e) => reject(e, &event_tx),
                    },
                    Some(UiCommand::Stop) => match ctl.stop() {
                        Ok(()) => {
                            next_tick = None;
                            let _ = event_tx.send(RunEvent::Stopped {
                                overall_progress: ctl.run().overall_progress,
                            });
                        }
                        Err(e) => reject(e, &event_tx),
                    },
                    Some(UiCommand::Quit) | None => {
                        // Leaving mid-run abandons it the same way an explicit stop does.
                        if ctl.run().is_active() && ctl.stop().is_ok() {
                            let _ = event_tx.send(RunEvent::Stopped {
                                overall_progress: ctl.run().overall_progress,
                            });
                        }
                        snapshot_tx.send_replace(ctl.snapshot());
                        break;
                    }
                }
            }
            _ = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => futures::future::pending().await,
                }
            } => {
                let outcome = ctl.tick();
                next_tick = match outcome {
                    TickOutcome::Idle | TickOutcome::RunCompleted { .. } => None,
                    TickOutcome::StepFinished { .. } => Some(Instant::now() + timing.step_gap),
                    TickOutcome::StepStarted { .. } | TickOutcome::Progressed { .. } => {
                        Some(Instant::now() + timing.tick_interval)
                    }
                };
                emit_tick(&ctl, outcome, &event_tx);
            }
        }

        snapshot_tx.send_replace(ctl.snapshot());
        if ctl.status().is_terminal() {
            break;
        }
    }

    let run = ctl.snapshot();
    if run.status == RunStatus::Completed {
        let _ = event_tx.send(RunEvent::RunCompleted {
            run: Box::new(run.clone()),
        });
    }
    Ok(run)
}

fn reject(err: TransitionError, event_tx: &UnboundedSender<RunEvent>) {
    tracing::warn!(error = %err, "command ignored");
    let _ = event_tx.send(RunEvent::Info(format!("Ignored: {err}")));
}

fn emit_step_started<R: Rng>(
    ctl: &RunController<R>,
    index: usize,
    event_tx: &UnboundedSender<RunEvent>,
) {
    let step = &ctl.run().steps[index];
    let _ = event_tx.send(RunEvent::StepStarted {
        index,
        step_id: step.id.clone(),
        name: step.name.clone(),
    });
}

fn emit_tick<R: Rng>(
    ctl: &RunController<R>,
    outcome: TickOutcome,
    event_tx: &UnboundedSender<RunEvent>,
) {
    let run = ctl.run();
    match outcome {
        TickOutcome::Idle => {}
        TickOutcome::StepStarted { index } => emit_step_started(ctl, index, event_tx),
        TickOutcome::Progressed { index } => {
            let step = &run.steps[index];
            let _ = event_tx.send(RunEvent::StepProgress {
                index,
                progress: step.progress,
                records_processed: step.records_processed,
                overall_progress: run.overall_progress,
            });
        }
        TickOutcome::StepFinished { index, status }
        | TickOutcome::RunCompleted { index, status } => {
            let step = &run.steps[index];
            let _ = event_tx.send(RunEvent::StepFinished {
                index,
                step_id: step.id.clone(),
                status,
                warnings: step.warnings.clone(),
                errors: step.errors.clone(),
                overall_progress: run.overall_progress,
            });
        }
    }
}
