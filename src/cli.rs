use crate::model::{OutcomePolicy, RunConfig, RunEvent};
use crate::orchestrator::{self, UiCommand};
use crate::plan;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "validation-run",
    version,
    about = "Simulated data-migration validation run with live progress"
)]
pub struct Cli {
    /// JSON file holding an array of step templates
    #[arg(long, conflicts_with = "checks")]
    pub plan: Option<std::path::PathBuf>,

    /// Comma-separated validation checks to run (see --list-checks)
    #[arg(long, value_delimiter = ',')]
    pub checks: Option<Vec<String>>,

    /// Print the available validation checks and exit
    #[arg(long)]
    pub list_checks: bool,

    /// Identifier for this run (defaults to run-<unix millis>)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Seed for the simulator's random source, for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Interval between progress ticks
    #[arg(long, default_value = "500ms")]
    pub tick_interval: humantime::Duration,

    /// Pause between a step finishing and the next one starting
    #[arg(long, default_value = "1s")]
    pub step_gap: humantime::Duration,

    /// Fixed offset from start used as the estimated completion time
    #[arg(long, default_value = "15m")]
    pub eta_offset: humantime::Duration,

    /// Largest progress increment per tick, in percent
    #[arg(long, default_value_t = 20.0)]
    pub max_increment: f64,

    /// Probability that a finished step is marked failed
    #[arg(long, default_value_t = 0.2)]
    pub fail_rate: f64,

    /// Probability that a finished step carries a warning
    #[arg(long, default_value_t = 0.5)]
    pub warning_rate: f64,

    /// Print the final run snapshot as JSON and exit (no progress output)
    #[arg(long, conflicts_with = "events_json")]
    pub json: bool,

    /// Stream every run event as a JSON line on stdout
    #[arg(long)]
    pub events_json: bool,

    /// Use --start-on-launch false to wait for a `start` command
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub start_on_launch: bool,

    /// Do not read control commands from stdin
    #[arg(long)]
    pub no_input: bool,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    pub verbose: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    if args.list_checks {
        for id in plan::catalog_ids() {
            println!("{id}");
        }
        return Ok(());
    }

    let cfg = build_config(&args)?;
    tracing::debug!(run_id = %cfg.run_id, steps = cfg.steps.len(), "config built");

    if args.json {
        return run_json(cfg).await;
    }
    run_text(args, cfg).await
}

/// Generate a run identifier from the current wall clock.
fn gen_run_id() -> String {
    let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    format!("run-{millis}")
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<RunConfig> {
    let steps = match (&args.plan, &args.checks) {
        (Some(path), _) => plan::load_plan(path)?,
        (None, Some(ids)) => plan::plan_from_checks(ids)?,
        (None, None) => plan::default_plan(),
    };
    let outcome = OutcomePolicy {
        max_increment: args.max_increment,
        fail_rate: args.fail_rate,
        warning_rate: args.warning_rate,
    };
    plan::validate_policy(&outcome)?;
    let eta_offset = Duration::from(args.eta_offset);
    plan::validate_eta_offset(eta_offset)?;

    Ok(RunConfig {
        run_id: args.run_id.clone().unwrap_or_else(gen_run_id),
        steps,
        seed: args.seed,
        tick_interval: Duration::from(args.tick_interval),
        step_gap: Duration::from(args.step_gap),
        eta_offset,
        outcome,
    })
}

/// Map a line typed on stdin to a command.
pub(crate) fn parse_command(input: &str) -> Option<UiCommand> {
    match input.trim().to_ascii_lowercase().as_str() {
        "start" => Some(UiCommand::Start),
        "p" | "pause" => Some(UiCommand::Pause),
        "r" | "resume" => Some(UiCommand::Resume),
        "s" | "stop" => Some(UiCommand::Stop),
        "q" | "quit" | "exit" => Some(UiCommand::Quit),
        _ => None,
    }
}

/// Forward stdin commands to the run task until stdin closes.
fn spawn_input_reader(cmd_tx: mpsc::UnboundedSender<UiCommand>, awaiting_start: bool) {
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        forward_commands(stdin, cmd_tx, awaiting_start).await;
    });
}

/// Send each recognized line as a command. If input closes while the run is
/// still waiting for `start`, nothing can start it any more, so it quits.
async fn forward_commands<B>(
    input: B,
    cmd_tx: mpsc::UnboundedSender<UiCommand>,
    mut awaiting_start: bool,
) where
    B: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_command(&line) {
            Some(cmd) => {
                if cmd == UiCommand::Start {
                    awaiting_start = false;
                }
                if cmd_tx.send(cmd).is_err() {
                    return;
                }
            }
            None if line.trim().is_empty() => {}
            None => tracing::warn!(input = %line.trim(), "unknown command"),
        }
    }
    if awaiting_start {
        tracing::debug!("input closed before start");
        let _ = cmd_tx.send(UiCommand::Quit);
    }
}

/// Ctrl-C abandons the run the same way `quit` does.
fn spawn_interrupt_forwarder(cmd_tx: mpsc::UnboundedSender<UiCommand>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cmd_tx.send(UiCommand::Quit);
        }
    });
}

async fn run_json(cfg: RunConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();

    let ctx = orchestrator::start_run(cfg, evt_tx);
    spawn_interrupt_forwarder(ctx.cmd_tx.clone());
    let _ = ctx.cmd_tx.send(UiCommand::Start);

    // Events are not printed in this mode; draining keeps the channel bounded.
    while evt_rx.recv().await.is_some() {}

    let run = ctx
        .handle
        .await
        .context("run task failed")?
        .context("validation run failed")?;

    let out = serde_json::to_string_pretty(&run)?;
    let _ = out_tx.send(OutputLine::Stdout(out));
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

async fn run_text(args: Cli, cfg: RunConfig) -> Result<()> {
    if !args.start_on_launch && args.no_input {
        anyhow::bail!("--start-on-launch false needs stdin commands; drop --no-input");
    }

    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();

    let ctx = orchestrator::start_run(cfg, evt_tx);
    // Step names and totals never change, so one copy serves every progress line.
    let view = ctx.snapshot_rx.borrow().clone();

    spawn_interrupt_forwarder(ctx.cmd_tx.clone());
    if !args.no_input {
        spawn_input_reader(ctx.cmd_tx.clone(), !args.start_on_launch);
        if !args.events_json {
            let _ = out_tx.send(OutputLine::Stderr(
                "Commands: start, pause (p), resume (r), stop (s), quit (q)".into(),
            ));
        }
    }
    if args.start_on_launch {
        let _ = ctx.cmd_tx.send(UiCommand::Start);
    }

    while let Some(ev) = evt_rx.recv().await {
        if args.events_json {
            let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string(&ev)?));
            continue;
        }
        if let Some(line) = crate::text_summary::event_line(&ev, &view) {
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
    }

    let run = ctx
        .handle
        .await
        .context("run task failed")?
        .context("validation run failed")?;

    if !args.events_json {
        let summary = crate::text_summary::build_text_summary(&run);
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
