//! External process execution with timeouts.
//!
//! Every collaborator (debloating tool, container runtime CLI, host-side
//! workload commands) goes through [`run_process`], so spawn failures,
//! timeouts and exit codes are reported uniformly.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

use crate::domain::CollaboratorError;

/// A fully described process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    /// Executable to run.
    pub program: String,

    pub args: Vec<String>,

    /// Extra environment variables.
    pub env: BTreeMap<String, String>,

    /// Kill the process and fail after this long; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line as a single string, for logs and messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a [`CollaboratorError::NonZeroExit`].
    pub fn ensure_success(self, program: &str) -> Result<Self, CollaboratorError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CollaboratorError::NonZeroExit {
                program: program.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Run a process to completion and capture its output.
///
/// A non-zero exit is not an error here; callers decide with
/// [`ProcessOutput::ensure_success`].
pub async fn run_process(spec: &ProcessSpec) -> Result<ProcessOutput, CollaboratorError> {
    let start = Instant::now();
    debug!(command = %spec.display(), "spawning process");

    let child = Command::new(&spec.program)
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CollaboratorError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

    let waited = match spec.timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| CollaboratorError::Timeout {
                program: spec.program.clone(),
                timeout_ms: limit.as_millis() as u64,
            })?,
        None => child.wait_with_output().await,
    };

    let output = waited.map_err(|source| CollaboratorError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    let duration_ms = start.elapsed().as_millis() as u64;
    let exit_code = output.status.code().unwrap_or(-1);
    debug!(command = %spec.display(), exit_code, duration_ms, "process finished");

    Ok(ProcessOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_spec_display() {
        let spec = ProcessSpec::new("docker").args(["stop", "tmp"]);
        assert_eq!(spec.display(), "docker stop tmp");
    }

    #[test]
    fn test_ensure_success() {
        let ok = ProcessOutput {
            exit_code: 0,
            stdout: "hello".to_string(),
            stderr: String::new(),
            duration_ms: 1,
        };
        assert!(ok.ensure_success("echo").is_ok());

        let failed = ProcessOutput {
            exit_code: 3,
            stdout: String::new(),
            stderr: "bad flag\n".to_string(),
            duration_ms: 1,
        };
        match failed.ensure_success("baffs") {
            Err(CollaboratorError::NonZeroExit { program, code, stderr }) => {
                assert_eq!(program, "baffs");
                assert_eq!(code, 3);
                assert_eq!(stderr, "bad flag");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_simple_command() {
        let spec = ProcessSpec::new("echo").arg("hello");
        let output = run_process(&spec).await.expect("run failed");
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_failing_command() {
        let output = run_process(&ProcessSpec::new("false")).await.expect("run failed");
        assert!(!output.success());
        assert_ne!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_env_is_passed() {
        let spec = ProcessSpec::new("sh")
            .args(["-c", "echo $DEBLOAT_IMAGE"])
            .env("DEBLOAT_IMAGE", "demo-baffs");
        let output = run_process(&spec).await.expect("run failed");
        assert_eq!(output.stdout.trim(), "demo-baffs");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let spec = ProcessSpec::new("definitely-not-a-real-binary-4d1f");
        let err = run_process(&spec).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let spec = ProcessSpec::new("sleep")
            .arg("5")
            .timeout(Some(Duration::from_millis(100)));
        let err = run_process(&spec).await.unwrap_err();
        match &err {
            CollaboratorError::Timeout { program, timeout_ms } => {
                assert_eq!(program, "sleep");
                assert_eq!(*timeout_ms, 100);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(err.to_string(), "sleep timed out after 100ms");
    }
}
