//! The workload definition file (`workloads.yml`).
//!
//! A workload directory holds `config.yml` and `workloads.yml`. The latter
//! describes which suite kind to instantiate, how to launch the container
//! under test, how to tell it is ready, and (for the declarative kind) the
//! test cases themselves.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{ConfigError, ImageIdentity};
use crate::runtime::{ContainerSpec, Mount};

/// Fixed name of the workload definition file inside a workload directory.
pub const WORKLOAD_FILE_NAME: &str = "workloads.yml";

/// Suite kind used when the definition does not name one.
pub const DEFAULT_KIND: &str = "declarative";

pub const DEFAULT_CONTAINER_NAME: &str = "debloat-workload";

/// Delay used when the definition has no readiness check at all.
pub const DEFAULT_READY_DELAY_MS: u64 = 5_000;

/// Parsed `workloads.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadDefinition {
    /// Suite name for reports; defaults to the directory name.
    #[serde(default)]
    pub name: Option<String>,

    /// Registered suite kind.
    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub container: ContainerTemplate,

    #[serde(default)]
    pub ready: ReadyCheck,

    #[serde(default)]
    pub cases: Vec<CaseDefinition>,

    /// Free-form parameters for non-declarative suite kinds.
    #[serde(default)]
    pub params: serde_yaml::Value,
}

fn default_kind() -> String {
    DEFAULT_KIND.to_string()
}

/// How to launch the container under test. The image comes from the
/// identity bound at run time, never from the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContainerTemplate {
    pub name: String,

    /// Network mode, e.g. `host`.
    pub network: Option<String>,

    /// Mount the workload directory at this path inside the container.
    pub mount: Option<String>,

    /// Entry command override.
    pub command: Vec<String>,

    pub env: BTreeMap<String, String>,
}

impl Default for ContainerTemplate {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONTAINER_NAME.to_string(),
            network: None,
            mount: None,
            command: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

impl ContainerTemplate {
    /// Container spec for `image`, mounting `workload_dir` if requested.
    pub fn instantiate(&self, image: &ImageIdentity, workload_dir: &Path) -> ContainerSpec {
        let mut spec = ContainerSpec::new(self.name.clone(), image.clone());
        spec.network = self.network.clone();
        spec.command = self.command.clone();
        spec.env = self.env.clone();
        if let Some(target) = &self.mount {
            spec.mounts.push(Mount {
                host: super::absolute(workload_dir),
                target: target.clone(),
            });
        }
        spec
    }
}

/// Readiness check for the container under test. At most one of `tcp`,
/// `exec` and `delay_ms` may be set; none means a fixed default delay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadyCheck {
    /// Ready once this address accepts TCP connections.
    pub tcp: Option<String>,

    /// Ready once this command exits 0 inside the container.
    pub exec: Option<Vec<String>>,

    /// Fixed delay instead of a probe.
    pub delay_ms: Option<u64>,

    /// Upper bound for probing.
    pub timeout_secs: u64,
}

impl Default for ReadyCheck {
    fn default() -> Self {
        Self {
            tcp: None,
            exec: None,
            delay_ms: None,
            timeout_secs: 30,
        }
    }
}

/// Resolved form of a [`ReadyCheck`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Delay(Duration),
    Tcp(String),
    Exec(Vec<String>),
}

impl ReadyCheck {
    pub fn resolve(&self) -> Result<Readiness, String> {
        match (&self.tcp, &self.exec, self.delay_ms) {
            (None, None, None) => Ok(Readiness::Delay(Duration::from_millis(DEFAULT_READY_DELAY_MS))),
            (Some(address), None, None) => Ok(Readiness::Tcp(address.clone())),
            (None, Some(command), None) if !command.is_empty() => Ok(Readiness::Exec(command.clone())),
            (None, Some(_), None) => Err("ready.exec must not be empty".to_string()),
            (None, None, Some(ms)) => Ok(Readiness::Delay(Duration::from_millis(ms))),
            _ => Err("only one of ready.tcp, ready.exec, ready.delay_ms may be set".to_string()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One test case. Exactly one of `exec`, `command`, `tcp` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseDefinition {
    pub name: String,

    /// Grouping label (the test class), prefixed to the case id.
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub exec: Option<ExecCase>,

    #[serde(default)]
    pub command: Option<CommandCase>,

    #[serde(default)]
    pub tcp: Option<TcpCase>,
}

/// Borrowed view of a case's single action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaseAction<'a> {
    Exec(&'a ExecCase),
    Command(&'a CommandCase),
    Tcp(&'a TcpCase),
}

impl CaseDefinition {
    /// `group::name`, or just `name` when ungrouped.
    pub fn id(&self) -> String {
        match &self.group {
            Some(group) => format!("{group}::{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn action(&self) -> Result<CaseAction<'_>, String> {
        match (&self.exec, &self.command, &self.tcp) {
            (Some(exec), None, None) => Ok(CaseAction::Exec(exec)),
            (None, Some(command), None) => Ok(CaseAction::Command(command)),
            (None, None, Some(tcp)) => Ok(CaseAction::Tcp(tcp)),
            (None, None, None) => Err(format!("case {:?} has no exec, command or tcp action", self.id())),
            _ => Err(format!("case {:?} has more than one action", self.id())),
        }
    }
}

/// Run a command inside the container under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecCase {
    pub command: Vec<String>,

    #[serde(default)]
    pub expect_exit: i32,

    /// Substring stdout must contain.
    #[serde(default)]
    pub expect_stdout: Option<String>,
}

/// Run a command on the host. `{image}`, `{container}` and
/// `{workload_dir}` in arguments are substituted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandCase {
    pub command: Vec<String>,

    #[serde(default)]
    pub expect_exit: i32,

    #[serde(default)]
    pub expect_stdout: Option<String>,

    #[serde(default = "default_command_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_command_timeout_secs() -> u64 {
    300
}

/// Ordered request/response exchanges on one TCP connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TcpCase {
    pub address: String,

    /// Bound for connecting and for each expected response.
    #[serde(default = "default_tcp_timeout_ms")]
    pub timeout_ms: u64,

    /// Background listener started before the exchanges.
    #[serde(default)]
    pub subscriber: Option<Subscriber>,

    #[serde(default)]
    pub exchanges: Vec<Exchange>,
}

fn default_tcp_timeout_ms() -> u64 {
    5_000
}

/// A single request and the substring the response must contain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exchange {
    pub send: String,

    #[serde(default)]
    pub expect: Option<String>,

    /// Wait this long before sending (e.g. for key expiry).
    #[serde(default)]
    pub delay_ms: u64,
}

/// A second connection that subscribes and must observe `expect`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscriber {
    pub send: String,

    /// Acknowledgement to wait for before the main exchanges start.
    #[serde(default)]
    pub ack: Option<String>,

    pub expect: String,
}

impl WorkloadDefinition {
    /// Path of the definition file inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(WORKLOAD_FILE_NAME)
    }

    /// Read, parse and validate `workloads.yml`, returning the definition
    /// and the SHA-256 hex digest of the file contents.
    pub fn load(dir: &Path) -> Result<(Self, String), ConfigError> {
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
                })
            }
        };
        let definition = Self::parse(&content, &path)?;
        Ok((definition, content_digest(content.as_bytes())))
    }

    pub fn parse(content: &str, source: &Path) -> Result<Self, ConfigError> {
        let definition: Self = serde_yaml::from_str(content).map_err(|e| ConfigError::Load {
            path: source.to_path_buf(),
            reason: format!("YAML parse error: {e}"),
        })?;
        definition.validate().map_err(|reason| ConfigError::Load {
            path: source.to_path_buf(),
            reason,
        })?;
        Ok(definition)
    }

    /// Structural checks shared by every suite kind.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind.trim().is_empty() {
            return Err("kind must not be empty".to_string());
        }
        if self.container.name.trim().is_empty() {
            return Err("container.name must not be empty".to_string());
        }
        self.ready.resolve()?;

        let mut seen = HashSet::new();
        for case in &self.cases {
            if case.name.trim().is_empty() {
                return Err("case names must not be empty".to_string());
            }
            if !seen.insert(case.id()) {
                return Err(format!("duplicate case {:?}", case.id()));
            }
            match case.action()? {
                CaseAction::Exec(exec) if exec.command.is_empty() => {
                    return Err(format!("case {:?}: exec.command is empty", case.id()));
                }
                CaseAction::Command(cmd) if cmd.command.is_empty() => {
                    return Err(format!("case {:?}: command.command is empty", case.id()));
                }
                CaseAction::Tcp(tcp) if tcp.exchanges.is_empty() && tcp.subscriber.is_none() => {
                    return Err(format!("case {:?}: tcp case has nothing to exchange", case.id()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Suite name, falling back to the directory name.
    pub fn suite_name(&self, dir: &Path) -> String {
        self.name.clone().unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "workload".to_string())
        })
    }
}

fn content_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMCACHED: &str = r#"
name: memcached
container:
  network: host
ready:
  tcp: "127.0.0.1:11211"
cases:
  - name: set_and_get
    group: TestMemcached
    tcp:
      address: "127.0.0.1:11211"
      exchanges:
        - send: "set test_key 0 0 10\r\ntest_value\r\n"
          expect: "STORED"
        - send: "get test_key\r\n"
          expect: "test_value"
  - name: version
    exec:
      command: [memcached, --version]
"#;

    fn parse(yaml: &str) -> Result<WorkloadDefinition, ConfigError> {
        WorkloadDefinition::parse(yaml, Path::new("workloads.yml"))
    }

    #[test]
    fn test_parse_memcached_definition() {
        let def = parse(MEMCACHED).expect("parse");
        assert_eq!(def.kind, DEFAULT_KIND);
        assert_eq!(def.container.name, DEFAULT_CONTAINER_NAME);
        assert_eq!(def.container.network.as_deref(), Some("host"));
        assert_eq!(def.ready.resolve(), Ok(Readiness::Tcp("127.0.0.1:11211".to_string())));
        assert_eq!(def.cases.len(), 2);
        assert_eq!(def.cases[0].id(), "TestMemcached::set_and_get");
        assert_eq!(def.cases[1].id(), "version");

        match def.cases[0].action().expect("action") {
            CaseAction::Tcp(tcp) => {
                assert_eq!(tcp.timeout_ms, 5_000);
                assert_eq!(tcp.exchanges[0].send, "set test_key 0 0 10\r\ntest_value\r\n");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_default_ready_is_fixed_delay() {
        let def = parse("cases: []\n").expect("parse");
        assert_eq!(
            def.ready.resolve(),
            Ok(Readiness::Delay(Duration::from_millis(DEFAULT_READY_DELAY_MS)))
        );
    }

    #[test]
    fn test_conflicting_ready_checks_rejected() {
        let err = parse("ready:\n  tcp: \"127.0.0.1:1\"\n  delay_ms: 10\n").unwrap_err();
        match err {
            ConfigError::Load { reason, .. } => assert!(reason.contains("only one")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_case_without_action_rejected() {
        let err = parse("cases:\n  - name: nothing\n").unwrap_err();
        assert!(err.to_string().contains("no exec, command or tcp"));
    }

    #[test]
    fn test_case_with_two_actions_rejected() {
        let yaml = "cases:\n  - name: both\n    exec: {command: [\"true\"]}\n    command: {command: [\"true\"]}\n";
        let err = parse(yaml).unwrap_err();
        assert!(err.to_string().contains("more than one action"));
    }

    #[test]
    fn test_duplicate_case_ids_rejected() {
        let yaml = "cases:\n  - {name: a, exec: {command: [\"true\"]}}\n  - {name: a, exec: {command: [\"true\"]}}\n";
        assert!(parse(yaml).unwrap_err().to_string().contains("duplicate"));

        let grouped = "cases:\n  - {name: a, group: X, exec: {command: [\"true\"]}}\n  - {name: a, group: Y, exec: {command: [\"true\"]}}\n";
        assert!(parse(grouped).is_ok());
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(parse("cases: [").unwrap_err(), ConfigError::Load { .. }));
    }

    #[test]
    fn test_instantiate_uses_bound_image_and_mount() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = ContainerTemplate {
            mount: Some("/app".to_string()),
            command: vec!["tail".into(), "-f".into(), "/dev/null".into()],
            ..ContainerTemplate::default()
        };
        let image = ImageIdentity::new("pytorch-baffs").expect("identity");
        let spec = template.instantiate(&image, dir.path());
        assert_eq!(spec.image, image);
        assert_eq!(spec.name, DEFAULT_CONTAINER_NAME);
        assert_eq!(spec.mounts.len(), 1);
        assert_eq!(spec.mounts[0].target, "/app");
        assert!(spec.mounts[0].host.is_absolute());
    }

    #[test]
    fn test_load_reports_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(WORKLOAD_FILE_NAME), MEMCACHED).expect("write");
        let (def, digest) = WorkloadDefinition::load(dir.path()).expect("load");
        let (_, again) = WorkloadDefinition::load(dir.path()).expect("load");
        assert_eq!(def.name.as_deref(), Some("memcached"));
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, again);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            WorkloadDefinition::load(dir.path()).unwrap_err(),
            ConfigError::NotFound { .. }
        ));
    }

    #[test]
    fn test_suite_name_falls_back_to_directory() {
        let def = parse("cases: []\n").expect("parse");
        assert_eq!(def.suite_name(Path::new("/work/redis")), "redis");
    }
}
