//! Results of running a workload suite against one image identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::image::ImageIdentity;

/// Outcome of a single workload case.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// The case ran to completion and every expectation held.
    Passed,

    /// An expectation did not hold.
    Failed,

    /// The case could not run (I/O error, timeout, panic).
    Errored,
}

impl CaseStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CaseStatus::Passed => "ok",
            CaseStatus::Failed => "FAIL",
            CaseStatus::Errored => "ERROR",
        }
    }
}

/// Result of one workload case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseResult {
    /// Case identifier (`group::name` when the case is grouped).
    pub case_id: String,

    pub status: CaseStatus,

    /// Failure or error message; `None` for passing cases.
    pub message: Option<String>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CaseResult {
    pub fn new(
        case_id: impl Into<String>,
        status: CaseStatus,
        message: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            status,
            message,
            duration_ms,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }

    /// One-line human-readable summary, e.g. `TestRedis::get ... FAIL: expected +OK`.
    pub fn summary_line(&self) -> String {
        match &self.message {
            Some(message) => format!("{} ... {}: {}", self.case_id, self.status.label(), message),
            None => format!("{} ... {}", self.case_id, self.status.label()),
        }
    }
}

/// Collapsed outcome of a suite run.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    AllPassed,
    Failed(Vec<CaseResult>),
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::AllPassed)
    }
}

/// Every case result of one suite run, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuiteReport {
    /// Suite name from the workload definition.
    pub suite: String,

    /// Identity the suite was bound to.
    pub identity: ImageIdentity,

    pub cases: Vec<CaseResult>,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl SuiteReport {
    pub fn passed_count(&self) -> usize {
        self.cases.iter().filter(|c| c.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.cases.iter().filter(|c| !c.passed()).count()
    }

    /// Failing and erroring cases, in execution order.
    pub fn failures(&self) -> Vec<CaseResult> {
        self.cases.iter().filter(|c| !c.passed()).cloned().collect()
    }

    pub fn result(&self) -> StageResult {
        let failures = self.failures();
        if failures.is_empty() {
            StageResult::AllPassed
        } else {
            StageResult::Failed(failures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(cases: Vec<CaseResult>) -> SuiteReport {
        let now = Utc::now();
        SuiteReport {
            suite: "memcached".to_string(),
            identity: ImageIdentity::new("memcached").expect("identity"),
            cases,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_all_passed() {
        let report = report(vec![
            CaseResult::new("set_and_get", CaseStatus::Passed, None, 10),
            CaseResult::new("delete_key", CaseStatus::Passed, None, 12),
        ]);
        assert_eq!(report.passed_count(), 2);
        assert_eq!(report.failed_count(), 0);
        assert_eq!(report.result(), StageResult::AllPassed);
    }

    #[test]
    fn test_failures_keep_every_case_in_order() {
        let report = report(vec![
            CaseResult::new("a", CaseStatus::Failed, Some("boom".into()), 1),
            CaseResult::new("b", CaseStatus::Passed, None, 1),
            CaseResult::new("c", CaseStatus::Errored, Some("refused".into()), 1),
        ]);
        match report.result() {
            StageResult::Failed(failures) => {
                let ids: Vec<_> = failures.iter().map(|f| f.case_id.as_str()).collect();
                assert_eq!(ids, vec!["a", "c"]);
            }
            StageResult::AllPassed => panic!("expected failures"),
        }
    }

    #[test]
    fn test_empty_suite_passes() {
        assert!(report(vec![]).result().is_success());
    }

    #[test]
    fn test_summary_line() {
        let ok = CaseResult::new("g::ok", CaseStatus::Passed, None, 1);
        assert_eq!(ok.summary_line(), "g::ok ... ok");

        let failed = CaseResult::new("g::bad", CaseStatus::Failed, Some("nope".into()), 1);
        assert_eq!(failed.summary_line(), "g::bad ... FAIL: nope");
    }
}
