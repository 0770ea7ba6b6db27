//! Harness configuration loaded from `<workload dir>/config.yml`.
//!
//! Only `image` is required. Every other section has defaults that match
//! the delays and binaries the harness has always used.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;
use super::image::ImageIdentity;

/// Fixed name of the configuration file inside a workload directory.
pub const CONFIG_FILE_NAME: &str = "config.yml";

/// Immutable configuration for one harness invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    /// Base image the workflow operates on.
    pub image: ImageIdentity,

    /// How to wait for external side effects to converge.
    #[serde(default)]
    pub settle: SettleConfig,

    /// Container runtime CLI settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Options forwarded to the debloating tool.
    #[serde(default)]
    pub debloat: DebloatOptions,

    /// Upper bound for a single tool invocation (0 = no limit).
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

/// Readiness polling policy used after external invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SettleConfig {
    /// Poll readiness probes; when false, sleep `fallback_delay_ms` instead.
    pub probe: bool,

    /// Give up polling after this many seconds.
    pub timeout_secs: u64,

    /// Delay between two probe attempts.
    pub poll_interval_ms: u64,

    /// Fixed delay used when no probe is available or probing is disabled.
    pub fallback_delay_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            probe: true,
            timeout_secs: 60,
            poll_interval_ms: 500,
            fallback_delay_ms: 3_000,
        }
    }
}

impl SettleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }
}

/// Container runtime CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime executable (`docker`, `podman`, or an absolute path).
    pub binary: String,

    /// Timeout for individual runtime commands; `pull` is exempt.
    pub command_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            command_timeout_secs: 120,
        }
    }
}

/// Options forwarded to the debloat mode of the tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebloatOptions {
    /// Only debloat the top N layers (`--top=N`); all layers when unset.
    pub top: Option<u32>,
}

fn default_tool_timeout_secs() -> u64 {
    1_800
}

impl Configuration {
    /// Configuration with defaults for everything but the image.
    pub fn new(image: ImageIdentity) -> Self {
        Self {
            image,
            settle: SettleConfig::default(),
            runtime: RuntimeConfig::default(),
            debloat: DebloatOptions::default(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }

    /// Path of the configuration file inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE_NAME)
    }

    /// Load `config.yml` from a workload directory.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound { path });
            }
            Err(e) => {
                return Err(ConfigError::Load {
                    path,
                    reason: e.to_string(),
                });
            }
        };
        Self::parse(&content, &path)
    }

    /// Parse configuration YAML; `source` is only used in error messages.
    pub fn parse(content: &str, source: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Load {
            path: source.to_path_buf(),
            reason: format!("YAML parse error: {e}"),
        })
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Configuration::parse("image: demo\n", Path::new("config.yml"))
            .expect("parse");
        assert_eq!(config.image.as_str(), "demo");
        assert_eq!(config.settle, SettleConfig::default());
        assert_eq!(config.runtime.binary, "docker");
        assert!(config.debloat.top.is_none());
        assert_eq!(config.tool_timeout(), Some(Duration::from_secs(1_800)));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
image: redis:7
settle:
  probe: false
  fallback_delay_ms: 100
runtime:
  binary: podman
debloat:
  top: 3
tool_timeout_secs: 0
"#;
        let config = Configuration::parse(yaml, Path::new("config.yml")).expect("parse");
        assert!(!config.settle.probe);
        assert_eq!(config.settle.fallback_delay(), Duration::from_millis(100));
        assert_eq!(config.settle.timeout_secs, 60);
        assert_eq!(config.runtime.binary, "podman");
        assert_eq!(config.debloat.top, Some(3));
        assert!(config.tool_timeout().is_none());
    }

    #[test]
    fn test_missing_image_key_is_load_error() {
        let err = Configuration::parse("settle:\n  probe: false\n", Path::new("config.yml"))
            .unwrap_err();
        match err {
            ConfigError::Load { reason, .. } => assert!(reason.contains("image")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_yaml_is_load_error() {
        let err = Configuration::parse("image: [unclosed", Path::new("config.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Configuration::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "image: memcached\n").expect("write");
        let config = Configuration::load(dir.path()).expect("load");
        assert_eq!(config.image.as_str(), "memcached");
    }
}
