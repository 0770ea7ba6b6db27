//! Error taxonomy for the debloat harness.
//!
//! Three families, each with its own propagation rule:
//! - [`ConfigError`]: missing or malformed configuration / workload files.
//!   Raised before any external side effect.
//! - [`CollaboratorError`]: the external tool or the container runtime
//!   failed, timed out, or never became ready.
//! - [`ValidationFailure`]: one or more workload cases failed during the
//!   validate stage. Carries every failing case, not only the first.

use std::fmt;
use std::path::PathBuf;

use super::image::ImageIdentity;
use super::report::CaseResult;

/// Configuration and workload definition errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("invalid image identity {value:?}: {reason}")]
    InvalidImage { value: String, reason: String },

    #[error("no workload suite registered for kind {0:?}")]
    UnknownKind(String),

    #[error("workload suite {0:?} has no image identity bound")]
    Unbound(String),
}

/// Failures of external collaborators (debloat tool, container runtime).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("{program} timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    #[error("{target} did not become ready within {timeout_ms}ms")]
    ReadinessTimeout { target: String, timeout_ms: u64 },
}

/// One or more workload cases failed against `identity`.
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub identity: ImageIdentity,
    pub failures: Vec<CaseResult>,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} workload case(s) failed against {}",
            self.failures.len(),
            self.identity
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure.summary_line())?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

/// Top-level harness error.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationFailure),
}

impl HarnessError {
    /// Short machine-readable label, used in reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Config(_) => "config",
            HarnessError::Collaborator(_) => "collaborator",
            HarnessError::Validation(_) => "validation",
        }
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
