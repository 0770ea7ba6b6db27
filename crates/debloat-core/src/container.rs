//! Scoped container acquisition.
//!
//! [`with_container`] starts a container, hands it to the body, and stops
//! it exactly once afterwards, whether the body returned normally, returned
//! an error, or panicked. A panic is re-raised after the release.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{info, warn};

use crate::domain::CollaboratorError;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec};

/// A container started for the duration of one workload run.
pub struct RunningContainer<'a> {
    runtime: &'a dyn ContainerRuntime,
    handle: ContainerHandle,
}

impl<'a> RunningContainer<'a> {
    /// Start a container from `spec`.
    pub async fn acquire(
        runtime: &'a dyn ContainerRuntime,
        spec: &ContainerSpec,
    ) -> Result<RunningContainer<'a>, CollaboratorError> {
        let handle = runtime.start(spec).await?;
        Ok(Self { runtime, handle })
    }

    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    /// Stop the container. Consumes the guard so it cannot run twice.
    pub async fn release(self) -> Result<(), CollaboratorError> {
        info!(container = %self.handle.name, "releasing container");
        self.runtime.stop(&self.handle).await
    }
}

impl std::fmt::Debug for RunningContainer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningContainer")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Run `body` against a freshly started container and always release it.
///
/// The body's value is returned when both the body and the release
/// succeed. If the release fails after a successful body, the release
/// error is returned; if the body failed, the release error is only logged.
pub async fn with_container<T, E, F, Fut>(
    runtime: &dyn ContainerRuntime,
    spec: &ContainerSpec,
    body: F,
) -> Result<T, E>
where
    E: From<CollaboratorError>,
    F: FnOnce(ContainerHandle) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let container = RunningContainer::acquire(runtime, spec).await?;
    let handle = container.handle().clone();

    let outcome = AssertUnwindSafe(body(handle.clone())).catch_unwind().await;
    let released = container.release().await;

    match outcome {
        Err(panic) => {
            if let Err(e) = released {
                warn!(container = %handle.name, error = %e, "failed to release container after panic");
            }
            std::panic::resume_unwind(panic)
        }
        Ok(Err(body_err)) => {
            if let Err(e) = released {
                warn!(container = %handle.name, error = %e, "failed to release container");
            }
            Err(body_err)
        }
        Ok(Ok(value)) => {
            released?;
            Ok(value)
        }
    }
}
