//! Stage gate evaluation for pass/fail criteria.

use serde::{Deserialize, Serialize};

use crate::report::StageReport;
use crate::stage::FailurePolicy;
use debloat_core::{StageResult, SuiteReport};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Stage gate rules.
pub struct StageGate;

impl StageGate {
    /// Evaluate a finished stage report under the stage's failure policy.
    ///
    /// Gate rule:
    /// - Informational stages always pass; failures are only counted.
    /// - Gated stages fail on every failing or erroring case, and when a
    ///   workload was expected but produced no results.
    pub fn evaluate(report: &StageReport) -> GateVerdict {
        let policy = report.stage.failure_policy();
        let expects_workload = report.workload_identity.is_some();

        if policy == FailurePolicy::Informational {
            let message = match (&report.suite, &report.workload_error) {
                (_, Some(error)) => format!("Workload did not complete ({error}); results are informational"),
                (Some(_), None) => format!(
                    "{} passed, {} failed; results are informational",
                    report.passed_count(),
                    report.failed_count()
                ),
                (None, None) => "No workload results".to_string(),
            };
            return GateVerdict {
                passed: true,
                violations: Vec::new(),
                message,
            };
        }

        let mut violations: Vec<String> = match report.suite.as_ref().map(SuiteReport::result) {
            Some(StageResult::Failed(failures)) => {
                failures.iter().map(|failure| failure.summary_line()).collect()
            }
            _ => Vec::new(),
        };
        if expects_workload && report.suite.is_none() {
            violations.push(match &report.workload_error {
                Some(error) => format!("Workload did not run: {error}"),
                None => "Workload did not run".to_string(),
            });
        }

        let passed = violations.is_empty();
        let message = if passed {
            match &report.suite {
                Some(suite) => format!("All {} case(s) passed", suite.cases.len()),
                None => "Stage passed".to_string(),
            }
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use chrono::Utc;
    use debloat_core::{CaseResult, CaseStatus, ImageIdentity, SuiteReport};
    use std::path::Path;

    fn report(stage: Stage, cases: Option<Vec<CaseResult>>) -> StageReport {
        let base = ImageIdentity::new("demo").expect("identity");
        let mut report = StageReport::begin(stage, base.clone(), Path::new("/w"));
        report.workload_identity = stage.workload_identity(&base);
        report.suite = cases.map(|cases| {
            let now = Utc::now();
            SuiteReport {
                suite: "demo".to_string(),
                identity: base.clone(),
                cases,
                started_at: now,
                finished_at: now,
                duration_ms: 0,
            }
        });
        report.finish()
    }

    fn failing() -> Vec<CaseResult> {
        vec![
            CaseResult::new("a", CaseStatus::Failed, Some("bad".into()), 1),
            CaseResult::new("b", CaseStatus::Passed, None, 1),
            CaseResult::new("c", CaseStatus::Errored, Some("refused".into()), 1),
        ]
    }

    #[test]
    fn test_validate_all_passed() {
        let verdict = StageGate::evaluate(&report(
            Stage::Validate,
            Some(vec![CaseResult::new("a", CaseStatus::Passed, None, 1)]),
        ));
        assert!(verdict.passed);
        assert_eq!(verdict.message, "All 1 case(s) passed");
    }

    #[test]
    fn test_validate_lists_every_failure() {
        let verdict = StageGate::evaluate(&report(Stage::Validate, Some(failing())));
        assert!(!verdict.passed);
        assert_eq!(verdict.violations, vec!["a ... FAIL: bad", "c ... ERROR: refused"]);
    }

    #[test]
    fn test_validate_without_results_fails() {
        let verdict = StageGate::evaluate(&report(Stage::Validate, None));
        assert!(!verdict.passed);
        assert_eq!(verdict.violations, vec!["Workload did not run"]);
    }

    #[test]
    fn test_profile_failures_are_informational() {
        let verdict = StageGate::evaluate(&report(Stage::Profile, Some(failing())));
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
        assert!(verdict.message.contains("2 failed"));
    }

    #[test]
    fn test_debloat_passes_without_workload() {
        let verdict = StageGate::evaluate(&report(Stage::Debloat, None));
        assert!(verdict.passed);
    }
}
