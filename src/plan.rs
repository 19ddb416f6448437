//! Run plans: the ordered step templates a run is created from.
//!
//! A plan comes from the built-in default, from a selection of catalog checks,
//! or from a JSON file holding an array of step templates.

use crate::model::{OutcomePolicy, StepTemplate};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("step at position {0} has an empty id")]
    EmptyId(usize),
    #[error("duplicate step id: {0}")]
    DuplicateId(String),
    #[error("unknown check: {0} (known: {1})")]
    UnknownCheck(String, String),
    #[error("{name} must be between 0 and 1, got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },
    #[error("max increment must be positive, got {0}")]
    NonPositiveIncrement(f64),
    #[error("eta offset of {0} runs past the supported calendar range")]
    EtaOutOfRange(String),
}

/// A selectable validation check and its expected workload.
struct Check {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    total_records: Option<u64>,
}

const INIT_STEP: Check = Check {
    id: "init",
    name: "Initialize Validation",
    description: "Setting up connections and preparing validation environment",
    total_records: None,
};

const REPORT_STEP: Check = Check {
    id: "finalize",
    name: "Generate Report",
    description: "Compiling validation results and generating reports",
    total_records: None,
};

const CATALOG: &[Check] = &[
    Check {
        id: "row-count",
        name: "Row Count Validation",
        description: "Comparing record counts between source and target tables",
        total_records: Some(57_000),
    },
    Check {
        id: "data-type",
        name: "Data Type Validation",
        description: "Verifying data types match between source and target",
        total_records: Some(12_500),
    },
    Check {
        id: "null-check",
        name: "NULL Value Validation",
        description: "Checking NULL value preservation and consistency",
        total_records: Some(57_000),
    },
    Check {
        id: "primary-key",
        name: "Primary Key Validation",
        description: "Validating primary key uniqueness and integrity",
        total_records: Some(4),
    },
    Check {
        id: "foreign-key",
        name: "Foreign Key Validation",
        description: "Checking referential integrity between tables",
        total_records: None,
    },
    Check {
        id: "duplicate-check",
        name: "Duplicate Detection",
        description: "Identifying duplicate records based on business rules",
        total_records: None,
    },
    Check {
        id: "data-range",
        name: "Data Range Validation",
        description: "Verifying data values fall within expected ranges",
        total_records: None,
    },
    Check {
        id: "performance-test",
        name: "Performance Benchmarking",
        description: "Comparing query performance between source and target",
        total_records: None,
    },
];

/// Checks enabled when nothing else is selected.
const DEFAULT_CHECKS: &[&str] = &["row-count", "data-type", "null-check", "primary-key"];

impl Check {
    fn template(&self) -> StepTemplate {
        StepTemplate::new(self.id, self.name, self.description, self.total_records)
    }
}

/// Ids accepted by `--checks`, in catalog order.
pub fn catalog_ids() -> Vec<&'static str> {
    CATALOG.iter().map(|c| c.id).collect()
}

pub fn default_plan() -> Vec<StepTemplate> {
    let ids: Vec<String> = DEFAULT_CHECKS.iter().map(|s| s.to_string()).collect();
    // The default selection is always part of the catalog.
    plan_from_checks(&ids).unwrap_or_default()
}

/// Build a plan from selected checks, framed by the initialize and report steps.
pub fn plan_from_checks(ids: &[String]) -> Result<Vec<StepTemplate>, PlanError> {
    let mut steps = vec![INIT_STEP.template()];
    for id in ids {
        let id = id.trim();
        let check = CATALOG.iter().find(|c| c.id == id).ok_or_else(|| {
            PlanError::UnknownCheck(id.to_string(), catalog_ids().join(", "))
        })?;
        steps.push(check.template());
    }
    steps.push(REPORT_STEP.template());
    validate_plan(&steps)?;
    Ok(steps)
}

/// Load a plan from a JSON array of step templates.
pub fn load_plan(path: &Path) -> Result<Vec<StepTemplate>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read plan file {}", path.display()))?;
    let steps: Vec<StepTemplate> = serde_json::from_str(&raw)
        .with_context(|| format!("parse plan file {}", path.display()))?;
    validate_plan(&steps)?;
    Ok(steps)
}

pub fn validate_plan(steps: &[StepTemplate]) -> Result<(), PlanError> {
    let mut seen = HashSet::new();
    for (i, step) in steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(PlanError::EmptyId(i));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(PlanError::DuplicateId(step.id.clone()));
        }
    }
    Ok(())
}

pub fn validate_policy(policy: &OutcomePolicy) -> Result<(), PlanError> {
    for (name, value) in [
        ("fail rate", policy.fail_rate),
        ("warning rate", policy.warning_rate),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(PlanError::RateOutOfRange { name, value });
        }
    }
    if !(policy.max_increment > 0.0 && policy.max_increment.is_finite()) {
        return Err(PlanError::NonPositiveIncrement(policy.max_increment));
    }
    Ok(())
}

/// Reject offsets that would push the estimated completion past the last
/// representable date.
pub fn validate_eta_offset(offset: Duration) -> Result<(), PlanError> {
    time::Duration::try_from(offset)
        .ok()
        .and_then(|offset| time::OffsetDateTime::now_utc().checked_add(offset))
        .map(|_| ())
        .ok_or_else(|| PlanError::EtaOutOfRange(humantime::format_duration(offset).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_matches_dashboard_steps() {
        let plan = default_plan();
        let ids: Vec<&str> = plan.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            ["init", "row-count", "data-type", "null-check", "primary-key", "finalize"]
        );
        assert_eq!(plan[1].total_records, Some(57_000));
        assert_eq!(plan[4].total_records, Some(4));
        assert_eq!(plan[0].total_records, None);
    }

    #[test]
    fn checks_are_framed_by_init_and_report() {
        let plan = plan_from_checks(&["foreign-key".into(), "data-range".into()]).unwrap();
        let ids: Vec<&str> = plan.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["init", "foreign-key", "data-range", "finalize"]);
    }

    #[test]
    fn unknown_check_is_rejected() {
        let err = plan_from_checks(&["row-count".into(), "bogus".into()]).unwrap_err();
        assert!(matches!(err, PlanError::UnknownCheck(ref id, _) if id == "bogus"));
    }

    #[test]
    fn repeated_check_is_a_duplicate() {
        let err = plan_from_checks(&["row-count".into(), "row-count".into()]).unwrap_err();
        assert_eq!(err, PlanError::DuplicateId("row-count".into()));
    }

    #[test]
    fn empty_id_is_rejected() {
        let steps = vec![StepTemplate::new(" ", "Blank", "", None)];
        assert_eq!(validate_plan(&steps), Err(PlanError::EmptyId(0)));
    }

    #[test]
    fn plan_file_parses_optional_fields() {
        let dir = std::env::temp_dir().join(format!("validation-plan-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("plan.json");
        std::fs::write(
            &path,
            r#"[{"id":"a","name":"A","total_records":10},{"id":"b","name":"B"}]"#,
        )
        .unwrap();

        let plan = load_plan(&path).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].total_records, Some(10));
        assert_eq!(plan[1].description, "");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_plan_file_reports_path() {
        let err = load_plan(Path::new("/nonexistent/plan.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/plan.json"));
    }

    #[test]
    fn policy_bounds_are_checked() {
        assert!(validate_policy(&OutcomePolicy::default()).is_ok());
        let bad = OutcomePolicy {
            fail_rate: 1.5,
            ..OutcomePolicy::default()
        };
        assert!(matches!(
            validate_policy(&bad),
            Err(PlanError::RateOutOfRange { name: "fail rate", .. })
        ));
        let flat = OutcomePolicy {
            max_increment: 0.0,
            ..OutcomePolicy::default()
        };
        assert_eq!(validate_policy(&flat), Err(PlanError::NonPositiveIncrement(0.0)));
    }

    #[test]
    fn eta_offset_must_fit_the_calendar() {
        assert!(validate_eta_offset(Duration::from_secs(15 * 60)).is_ok());
        let far = Duration::from_secs(20_000 * 365 * 24 * 3600);
        assert!(matches!(
            validate_eta_offset(far),
            Err(PlanError::EtaOutOfRange(_))
        ));
    }
}
