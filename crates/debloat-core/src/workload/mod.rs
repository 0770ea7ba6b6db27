//! Workload suites: the tests that exercise an image.
//!
//! A suite is loaded from a workload directory, bound to exactly one image
//! identity, and only then asked for its container spec and its cases.
//! Cases receive the bound identity and the running container explicitly
//! through [`CaseContext`].

pub mod cases;
pub mod declarative;
pub mod definition;
pub mod loader;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::{CaseStatus, CollaboratorError, ConfigError, ImageIdentity};
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec};

pub use declarative::DeclarativeSuite;
pub use definition::{
    CaseDefinition, ContainerTemplate, Readiness, ReadyCheck, WorkloadDefinition,
    DEFAULT_CONTAINER_NAME, DEFAULT_KIND, WORKLOAD_FILE_NAME,
};
pub use loader::{LoadedWorkload, SuiteFactory, WorkloadLoader, WorkloadRegistry};

/// Everything a case may touch while it runs.
pub struct CaseContext<'a> {
    /// Identity the suite is bound to.
    pub identity: &'a ImageIdentity,
    pub container: &'a ContainerHandle,
    pub runtime: &'a dyn ContainerRuntime,
    pub workload_dir: &'a Path,
}

/// Why a case did not pass.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    /// An expectation did not hold.
    #[error("{0}")]
    Assertion(String),

    /// The runtime could not carry out a step of the case.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CaseError {
    pub fn assertion(message: impl Into<String>) -> Self {
        CaseError::Assertion(message.into())
    }

    /// Status recorded in the suite report.
    pub fn status(&self) -> CaseStatus {
        match self {
            CaseError::Assertion(_) => CaseStatus::Failed,
            CaseError::Collaborator(_) | CaseError::Other(_) => CaseStatus::Errored,
        }
    }
}

/// One runnable test case.
#[async_trait]
pub trait TestCase: Send + Sync {
    /// `group::name`, unique within the suite.
    fn id(&self) -> String;

    async fn run(&self, ctx: &CaseContext<'_>) -> Result<(), CaseError>;
}

/// A collection of cases exercising one workload.
pub trait WorkloadSuite: Send + Sync {
    fn name(&self) -> &str;

    /// Directory the suite was loaded from.
    fn workload_dir(&self) -> &Path;

    /// Bind the identity under test. Rebinding replaces the previous one.
    fn bind_identity(&mut self, identity: ImageIdentity);

    fn identity(&self) -> Option<&ImageIdentity>;

    /// Container to start for this suite. Fails until an identity is bound.
    fn container_spec(&self) -> Result<ContainerSpec, ConfigError>;

    fn ready_check(&self) -> &ReadyCheck;

    /// Cases in execution order. Fails until an identity is bound.
    fn list_cases(&self) -> Result<Vec<Arc<dyn TestCase>>, ConfigError>;

    /// The bound identity or [`ConfigError::Unbound`].
    fn require_identity(&self) -> Result<&ImageIdentity, ConfigError> {
        self.identity()
            .ok_or_else(|| ConfigError::Unbound(self.name().to_string()))
    }
}

/// Substitute `{image}`, `{container}` and `{workload_dir}` in `template`.
pub fn substitute(template: &str, identity: &ImageIdentity, container: &str, workload_dir: &Path) -> String {
    template
        .replace("{image}", identity.as_str())
        .replace("{container}", container)
        .replace("{workload_dir}", &workload_dir.display().to_string())
}

pub(crate) fn absolute(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}
