//! Top-level orchestration: configuration, stage, gate, outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::gate::{GateVerdict, StageGate};
use crate::report::StageReport;
use crate::runner::StageRunner;
use crate::stage::Stage;
use debloat_core::{
    Configuration, DockerCli, ExternalTool, HarnessError, ValidationFailure, WorkloadLoader,
};

/// Final outcome of one invocation.
#[derive(Debug)]
pub enum ProcessOutcome {
    Success {
        report: StageReport,
        verdict: GateVerdict,
    },
    Failure {
        error: HarnessError,
        /// Present when the stage ran far enough to produce one.
        report: Option<StageReport>,
    },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success { .. })
    }

    /// 0 on success, 1 on any failure.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn report(&self) -> Option<&StageReport> {
        match self {
            ProcessOutcome::Success { report, .. } => Some(report),
            ProcessOutcome::Failure { report, .. } => report.as_ref(),
        }
    }

    pub fn error(&self) -> Option<&HarnessError> {
        match self {
            ProcessOutcome::Success { .. } => None,
            ProcessOutcome::Failure { error, .. } => Some(error),
        }
    }
}

type RunnerFactory = Arc<dyn Fn(&Configuration) -> StageRunner + Send + Sync>;

/// Selects and runs a stage, then gates its result.
#[derive(Clone)]
pub struct Orchestrator {
    factory: RunnerFactory,
}

impl Orchestrator {
    /// Use a fixed runner regardless of configuration.
    pub fn new(runner: StageRunner) -> Self {
        Self {
            factory: Arc::new(move |_: &Configuration| runner.clone()),
        }
    }

    /// The docker CLI and the tool at `tool_path`, configured from
    /// `config.yml` once it is loaded.
    pub fn external(tool_path: impl Into<PathBuf>) -> Self {
        let tool_path = tool_path.into();
        Self {
            factory: Arc::new(move |config: &Configuration| {
                StageRunner::new(
                    Arc::new(DockerCli::from_config(&config.runtime)),
                    Arc::new(ExternalTool::new(tool_path.clone(), config.tool_timeout())),
                    WorkloadLoader::default(),
                )
            }),
        }
    }

    /// Run `stage` with an already loaded configuration.
    pub async fn run(&self, stage: Stage, dir: &Path, config: &Configuration) -> ProcessOutcome {
        let runner = (self.factory)(config);
        let report = match runner.execute(stage, dir, config).await {
            Ok(report) => report,
            Err(error) => {
                error!(stage = %stage, kind = error.kind(), error = %error, "stage failed");
                return ProcessOutcome::Failure {
                    error,
                    report: None,
                };
            }
        };

        let verdict = StageGate::evaluate(&report);
        if verdict.passed {
            info!(stage = %stage, message = %verdict.message, "stage succeeded");
            return ProcessOutcome::Success { report, verdict };
        }

        error!(stage = %stage, message = %verdict.message, "stage gate failed");
        let failure = ValidationFailure {
            identity: report
                .workload_identity
                .clone()
                .unwrap_or_else(|| report.base_identity.clone()),
            failures: report.failures(),
        };
        ProcessOutcome::Failure {
            error: failure.into(),
            report: Some(report),
        }
    }

    /// Load `config.yml` from `dir`, then [`Orchestrator::run`]. A missing
    /// or invalid configuration fails before any collaborator is built.
    pub async fn load_and_run(&self, stage: Stage, dir: &Path) -> ProcessOutcome {
        match Configuration::load(dir) {
            Ok(config) => self.run(stage, dir, &config).await,
            Err(e) => {
                let error = HarnessError::from(e);
                error!(stage = %stage, kind = error.kind(), error = %error, "configuration failed");
                ProcessOutcome::Failure {
                    error,
                    report: None,
                }
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use debloat_core::ConfigError;

    #[test]
    fn test_exit_codes() {
        let failure = ProcessOutcome::Failure {
            error: ConfigError::UnknownKind("x".into()).into(),
            report: None,
        };
        assert_eq!(failure.exit_code(), 1);
        assert!(failure.report().is_none());
        assert_eq!(failure.error().map(HarnessError::kind), Some("config"));
    }

    #[tokio::test]
    async fn test_missing_config_fails_before_runner_is_built() {
        let built = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = built.clone();
        let orchestrator = Orchestrator {
            factory: Arc::new(move |_: &Configuration| {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                StageRunner::new(
                    Arc::new(debloat_core::fakes::RecordingRuntime::new()),
                    Arc::new(debloat_core::fakes::RecordingTool::new()),
                    WorkloadLoader::default(),
                )
            }),
        };

        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = orchestrator.load_and_run(Stage::Profile, dir.path()).await;
        assert_eq!(outcome.exit_code(), 1);
        assert!(matches!(
            outcome.error(),
            Some(HarnessError::Config(ConfigError::NotFound { .. }))
        ));
        assert!(!built.load(std::sync::atomic::Ordering::SeqCst));
    }
}
