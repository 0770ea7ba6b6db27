//! Workload execution: container, readiness, cases.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use debloat_core::readiness::{settle, ExecProbe, ReadinessPolicy, TcpProbe};
use debloat_core::workload::{CaseContext, Readiness, WorkloadSuite};
use debloat_core::{
    with_container, CaseResult, CaseStatus, ContainerHandle, ContainerRuntime, HarnessError,
    SuiteReport,
};

/// Start the suite's container, wait until it is ready, run every case and
/// release the container.
///
/// Case failures and panics are recorded in the report. Only container,
/// readiness and binding problems are returned as errors.
pub async fn run_workload(
    runtime: &dyn ContainerRuntime,
    suite: &dyn WorkloadSuite,
    poll_interval: Duration,
) -> Result<SuiteReport, HarnessError> {
    let identity = suite.require_identity()?.clone();
    let spec = suite.container_spec()?;
    let cases = suite.list_cases()?;

    with_container::<_, HarnessError, _, _>(runtime, &spec, |handle| async move {
        wait_ready(runtime, suite, &handle, poll_interval).await?;

        let started_at = Utc::now();
        let start = Instant::now();
        let ctx = CaseContext {
            identity: &identity,
            container: &handle,
            runtime,
            workload_dir: suite.workload_dir(),
        };

        let mut results = Vec::with_capacity(cases.len());
        for case in &cases {
            let id = case.id();
            let case_start = Instant::now();
            let outcome = AssertUnwindSafe(case.run(&ctx)).catch_unwind().await;
            let duration_ms = case_start.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(Ok(())) => CaseResult::new(id, CaseStatus::Passed, None, duration_ms),
                Ok(Err(e)) => CaseResult::new(id, e.status(), Some(e.to_string()), duration_ms),
                Err(panic) => CaseResult::new(
                    id,
                    CaseStatus::Errored,
                    Some(format!("panicked: {}", panic_message(panic.as_ref()))),
                    duration_ms,
                ),
            };
            if result.passed() {
                info!(case = %result.case_id, duration_ms, "case passed");
            } else {
                warn!(case = %result.case_id, status = result.status.label(), message = ?result.message, "case did not pass");
            }
            results.push(result);
        }

        Ok(SuiteReport {
            suite: suite.name().to_string(),
            identity: identity.clone(),
            cases: results,
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    })
    .await
}

async fn wait_ready(
    runtime: &dyn ContainerRuntime,
    suite: &dyn WorkloadSuite,
    handle: &ContainerHandle,
    poll_interval: Duration,
) -> Result<(), HarnessError> {
    let check = suite.ready_check();
    let readiness = check
        .resolve()
        .map_err(|reason| debloat_core::ConfigError::Load {
            path: suite.workload_dir().to_path_buf(),
            reason,
        })?;

    let mut policy = ReadinessPolicy {
        timeout: check.timeout(),
        interval: poll_interval,
        fallback_delay: Duration::ZERO,
    };
    match readiness {
        Readiness::Delay(delay) => {
            policy.fallback_delay = delay;
            settle(None, &policy).await?;
        }
        Readiness::Tcp(address) => {
            let probe = TcpProbe {
                address,
                connect_timeout: poll_interval.max(Duration::from_millis(100)),
            };
            settle(Some(&probe), &policy).await?;
        }
        Readiness::Exec(command) => {
            let probe = ExecProbe {
                runtime,
                handle: handle.clone(),
                command,
            };
            settle(Some(&probe), &policy).await?;
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
