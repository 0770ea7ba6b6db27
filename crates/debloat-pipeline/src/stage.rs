//! Stage definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use debloat_core::ImageIdentity;

/// The three top-level operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Run the workload against the base image under the tool's shadow mode.
    Profile,

    /// Ask the tool to produce `<base>-baffs`.
    Debloat,

    /// Run the workload against `<base>-baffs`; every case must pass.
    Validate,
}

/// How workload results feed into the stage outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Results are collected but never fail the stage.
    Informational,

    /// Any failing case fails the stage.
    Gate,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Profile, Stage::Debloat, Stage::Validate];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Profile => "profile",
            Stage::Debloat => "debloat",
            Stage::Validate => "validate",
        }
    }

    /// Identity the workload is bound to, or `None` if the stage runs no workload.
    pub fn workload_identity(&self, base: &ImageIdentity) -> Option<ImageIdentity> {
        match self {
            Stage::Profile => Some(base.clone()),
            Stage::Debloat => None,
            Stage::Validate => Some(base.debloated()),
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            Stage::Profile => FailurePolicy::Informational,
            Stage::Debloat | Stage::Validate => FailurePolicy::Gate,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action {0:?} (expected profile, debloat or validate)")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.name().parse::<Stage>(), Ok(stage));
        }
        assert!("shadow".parse::<Stage>().is_err());
        assert!("Profile".parse::<Stage>().is_err());
    }

    #[test]
    fn test_workload_identity() {
        let base = ImageIdentity::new("demo").expect("identity");
        assert_eq!(Stage::Profile.workload_identity(&base), Some(base.clone()));
        assert_eq!(Stage::Debloat.workload_identity(&base), None);
        assert_eq!(
            Stage::Validate.workload_identity(&base).map(|i| i.to_string()),
            Some("demo-baffs".to_string())
        );
    }

    #[test]
    fn test_failure_policy() {
        assert_eq!(Stage::Profile.failure_policy(), FailurePolicy::Informational);
        assert_eq!(Stage::Validate.failure_policy(), FailurePolicy::Gate);
    }
}
