//! Stage execution.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::report::StageReport;
use crate::stage::Stage;
use crate::suite::run_workload;
use debloat_core::readiness::{settle, DaemonProbe, ReadinessPolicy, ReadinessProbe};
use debloat_core::workload::LoadedWorkload;
use debloat_core::{
    CollaboratorError, ConfigError, Configuration, ContainerRuntime, DebloatTool, HarnessError,
    ToolRequest, WorkloadLoader,
};

/// Runs one stage against its collaborators.
#[derive(Clone)]
pub struct StageRunner {
    runtime: Arc<dyn ContainerRuntime>,
    tool: Arc<dyn DebloatTool>,
    loader: WorkloadLoader,
}

impl StageRunner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        tool: Arc<dyn DebloatTool>,
        loader: WorkloadLoader,
    ) -> Self {
        Self {
            runtime,
            tool,
            loader,
        }
    }

    /// Execute `stage` for the workload in `dir`.
    ///
    /// The workload is loaded and bound before any collaborator is called,
    /// so a broken definition aborts without side effects. Case failures
    /// are recorded in the report, not returned as errors; the caller
    /// applies the stage gate.
    pub async fn execute(
        &self,
        stage: Stage,
        dir: &Path,
        config: &Configuration,
    ) -> Result<StageReport, HarnessError> {
        let mut report = StageReport::begin(stage, config.image.clone(), dir);
        info!(run_id = %report.run_id, stage = %stage, image = %config.image, "starting stage");

        let workload = match stage.workload_identity(&config.image) {
            Some(identity) => {
                let workload = self.loader.load_bound(dir, identity.clone())?;
                report.workload_identity = Some(identity);
                report.definition_digest = Some(workload.definition_digest.clone());
                Some(workload)
            }
            None => None,
        };

        match (stage, workload) {
            (Stage::Profile, Some(workload)) => self.profile(config, &workload, &mut report).await?,
            (Stage::Debloat, _) => self.debloat(config).await?,
            (Stage::Validate, Some(workload)) => self.validate(config, &workload, &mut report).await?,
            (_, None) => return Err(ConfigError::Unbound(dir.display().to_string()).into()),
        }

        let report = report.finish();
        info!(
            run_id = %report.run_id,
            stage = %stage,
            passed = report.passed_count(),
            failed = report.failed_count(),
            duration_ms = report.duration_ms,
            "stage finished"
        );
        Ok(report)
    }

    async fn profile(
        &self,
        config: &Configuration,
        workload: &LoadedWorkload,
        report: &mut StageReport,
    ) -> Result<(), HarnessError> {
        self.runtime.pull(&config.image).await?;
        self.tool.invoke(&ToolRequest::shadow(config.image.clone())).await?;
        self.settle(
            config,
            &DaemonProbe {
                runtime: self.runtime.as_ref(),
            },
        )
        .await?;

        // Profiling only collects observations; a broken run is not fatal.
        match run_workload(self.runtime.as_ref(), workload.suite.as_ref(), config.settle.poll_interval()).await {
            Ok(suite) => {
                if suite.failed_count() > 0 {
                    warn!(failed = suite.failed_count(), "workload cases failed while profiling");
                }
                report.suite = Some(suite);
            }
            Err(e) => {
                warn!(error = %e, "workload run failed while profiling");
                report.workload_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    /// Success is the tool's exit status alone. The derived image is only
    /// looked up for the log: the tool names it after the base image's
    /// first repo tag, which need not match `<image>-baffs`.
    async fn debloat(&self, config: &Configuration) -> Result<(), HarnessError> {
        self.tool
            .invoke(&ToolRequest::debloat(config.image.clone(), config.debloat.top))
            .await?;
        self.settle(
            config,
            &DaemonProbe {
                runtime: self.runtime.as_ref(),
            },
        )
        .await?;

        let derived = config.image.debloated();
        match self.runtime.image_exists(&derived).await {
            Ok(true) => info!(image = %derived, "debloated image present"),
            Ok(false) => warn!(image = %derived, "debloated image not found under the expected name"),
            Err(e) => warn!(image = %derived, error = %e, "could not look up debloated image"),
        }
        Ok(())
    }

    async fn validate(
        &self,
        config: &Configuration,
        workload: &LoadedWorkload,
        report: &mut StageReport,
    ) -> Result<(), HarnessError> {
        let suite = run_workload(
            self.runtime.as_ref(),
            workload.suite.as_ref(),
            config.settle.poll_interval(),
        )
        .await?;
        report.suite = Some(suite);
        Ok(())
    }

    /// Wait for the tool's background effects, or sleep the fallback delay
    /// when probing is disabled.
    async fn settle(
        &self,
        config: &Configuration,
        probe: &dyn ReadinessProbe,
    ) -> Result<(), CollaboratorError> {
        let policy = ReadinessPolicy::from(&config.settle);
        settle(config.settle.probe.then_some(probe), &policy).await
    }
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}
