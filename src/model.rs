use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// Knobs that shape a simulated run. Built from CLI arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_id: String,
    pub steps: Vec<StepTemplate>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub step_gap: Duration,
    #[serde(with = "humantime_serde")]
    pub eta_offset: Duration,
    pub outcome: OutcomePolicy,
}

/// Probabilities and bounds used by the step simulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomePolicy {
    /// Upper bound of the per-tick progress increment, in percent.
    pub max_increment: f64,
    pub fail_rate: f64,
    pub warning_rate: f64,
}

impl Default for OutcomePolicy {
    fn default() -> Self {
        Self {
            max_increment: 20.0,
            fail_rate: 0.2,
            warning_rate: 0.5,
        }
    }
}

/// A step as handed in at run creation, before any execution state exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub total_records: Option<u64>,
}

impl StepTemplate {
    pub fn new(id: &str, name: &str, description: &str, total_records: Option<u64>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            total_records,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::Running => "Running",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
            StepStatus::Skipped => "Skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            RunStatus::NotStarted => "Not started",
            RunStatus::Running => "Running",
            RunStatus::Paused => "Paused",
            RunStatus::Completed => "Completed",
            RunStatus::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStep {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: StepStatus,
    pub progress: f64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub total_records: Option<u64>,
    #[serde(default)]
    pub records_processed: Option<u64>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationStep {
    pub fn from_template(t: &StepTemplate) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            description: t.description.clone(),
            status: StepStatus::Pending,
            progress: 0.0,
            start_time: None,
            end_time: None,
            total_records: t.total_records,
            records_processed: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Records covered so far, projected from `progress`.
    pub fn project_records(&self) -> Option<u64> {
        self.total_records
            .map(|total| ((self.progress / 100.0) * total as f64).floor() as u64)
    }

    /// Elapsed time between start and end, or until now while still running.
    pub fn duration(&self) -> Option<Duration> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or_else(OffsetDateTime::now_utc);
        let secs = (end - start).as_seconds_f64().abs();
        Some(Duration::from_secs_f64(secs))
    }

    /// Duration formatted as seconds with one decimal, `-` when never started.
    pub fn duration_label(&self) -> String {
        match self.duration() {
            Some(d) => format!("{:.1}s", d.as_secs_f64()),
            None => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRun {
    pub id: String,
    pub status: RunStatus,
    pub steps: Vec<ValidationStep>,
    pub overall_progress: f64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub estimated_completion: Option<OffsetDateTime>,
    pub total_steps: usize,
    pub completed_steps: usize,
}

impl ValidationRun {
    pub fn new(id: impl Into<String>, templates: &[StepTemplate]) -> Self {
        let steps: Vec<ValidationStep> =
            templates.iter().map(ValidationStep::from_template).collect();
        Self {
            id: id.into(),
            status: RunStatus::NotStarted,
            total_steps: steps.len(),
            steps,
            overall_progress: 0.0,
            start_time: None,
            estimated_completion: None,
            completed_steps: 0,
        }
    }

    /// True while the run can still be paused, resumed or stopped.
    pub fn is_active(&self) -> bool {
        matches!(self.status, RunStatus::Running | RunStatus::Paused)
    }
}

/// Events emitted by the run orchestrator and consumed by presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        #[serde(with = "time::serde::rfc3339::option")]
        estimated_completion: Option<OffsetDateTime>,
    },
    StepStarted {
        index: usize,
        step_id: String,
        name: String,
    },
    StepProgress {
        index: usize,
        progress: f64,
        records_processed: Option<u64>,
        overall_progress: f64,
    },
    StepFinished {
        index: usize,
        step_id: String,
        status: StepStatus,
        warnings: Vec<String>,
        errors: Vec<String>,
        overall_progress: f64,
    },
    Paused,
    Resumed,
    Stopped {
        overall_progress: f64,
    },
    RunCompleted {
        // Boxed so the enum stays small; a full run carries every step.
        run: Box<ValidationRun>,
    },
    Info(String),
}
