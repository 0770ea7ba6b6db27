//! Domain models for the debloat harness.
//!
//! - `ImageIdentity`: image reference plus the debloated naming convention
//! - `Configuration`: per-invocation settings from `config.yml`
//! - `SuiteReport` / `StageResult`: outcome of a workload run
//! - `HarnessError`: config / collaborator / validation taxonomy

pub mod config;
pub mod error;
pub mod image;
pub mod report;

pub use config::{Configuration, DebloatOptions, RuntimeConfig, SettleConfig, CONFIG_FILE_NAME};
pub use error::{CollaboratorError, ConfigError, HarnessError, Result, ValidationFailure};
pub use image::{ImageIdentity, DEBLOATED_SUFFIX};
pub use report::{CaseResult, CaseStatus, StageResult, SuiteReport};
