//! Container image identities and the debloated-image naming convention.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::ConfigError;

/// Suffix the debloating tool appends to the images it produces.
///
/// Fixed on purpose: the tool names its output `<base>-baffs` and the
/// validate stage must target exactly that name.
pub const DEBLOATED_SUFFIX: &str = "-baffs";

/// A validated container image reference (e.g. `redis`, `redis:7`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageIdentity(String);

impl ImageIdentity {
    /// Create a new identity, rejecting empty values and embedded whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, ConfigError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidImage {
                value,
                reason: "must not be empty".to_string(),
            });
        }
        if value.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidImage {
                value,
                reason: "must not contain whitespace".to_string(),
            });
        }
        Ok(Self(value))
    }

    /// The identity of the image the tool derives from this one.
    pub fn debloated(&self) -> Self {
        Self(format!("{}{}", self.0, DEBLOATED_SUFFIX))
    }

    /// Whether this identity already carries the debloated suffix.
    pub fn is_debloated(&self) -> bool {
        self.0.ends_with(DEBLOATED_SUFFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ImageIdentity {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ImageIdentity> for String {
    fn from(identity: ImageIdentity) -> Self {
        identity.0
    }
}

impl fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debloated_appends_fixed_suffix() {
        let base = ImageIdentity::new("demo").expect("identity");
        assert_eq!(base.debloated().as_str(), "demo-baffs");
        assert!(base.debloated().is_debloated());
        assert!(!base.is_debloated());
    }

    #[test]
    fn test_debloated_keeps_tag() {
        let base = ImageIdentity::new("redis:7").expect("identity");
        assert_eq!(base.debloated().to_string(), "redis:7-baffs");
    }

    #[test]
    fn test_rejects_empty_and_whitespace() {
        assert!(ImageIdentity::new("").is_err());
        assert!(ImageIdentity::new("   ").is_err());
        assert!(matches!(
            ImageIdentity::new("demo image"),
            Err(ConfigError::InvalidImage { .. })
        ));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ImageIdentity = serde_yaml::from_str("memcached").expect("deserialize");
        assert_eq!(ok.as_str(), "memcached");

        let err = serde_yaml::from_str::<ImageIdentity>("\"\"");
        assert!(err.is_err());
    }
}
