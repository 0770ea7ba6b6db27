//! Stage reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::stage::Stage;
use debloat_core::{CaseResult, ImageIdentity, SuiteReport};

/// Everything one stage invocation did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageReport {
    pub run_id: String,

    pub stage: Stage,

    /// Base image identity from `config.yml`.
    pub base_identity: ImageIdentity,

    /// Identity the workload was bound to, if the stage runs one.
    pub workload_identity: Option<ImageIdentity>,

    /// SHA-256 of `workloads.yml`, if the stage loaded it.
    pub definition_digest: Option<String>,

    pub workload_dir: PathBuf,

    /// Case results, if the workload ran.
    pub suite: Option<SuiteReport>,

    /// Why the workload did not run to completion (profile only).
    pub workload_error: Option<String>,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl StageReport {
    pub fn begin(stage: Stage, base_identity: ImageIdentity, workload_dir: &Path) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            stage,
            base_identity,
            workload_identity: None,
            definition_digest: None,
            workload_dir: workload_dir.to_path_buf(),
            suite: None,
            workload_error: None,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.duration_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self
    }

    pub fn passed_count(&self) -> usize {
        self.suite.as_ref().map_or(0, SuiteReport::passed_count)
    }

    pub fn failed_count(&self) -> usize {
        self.suite.as_ref().map_or(0, SuiteReport::failed_count)
    }

    pub fn failures(&self) -> Vec<CaseResult> {
        self.suite.as_ref().map(SuiteReport::failures).unwrap_or_default()
    }

    pub fn cases(&self) -> &[CaseResult] {
        self.suite
            .as_ref()
            .map(|suite| suite.cases.as_slice())
            .unwrap_or(&[])
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
