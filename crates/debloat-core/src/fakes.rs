//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `RecordingRuntime` and `RecordingTool`, which record every call
//! into a shared `CallLog` so tests can assert on the exact ordering of
//! external side effects without a container daemon.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::{CollaboratorError, ImageIdentity};
use crate::process::ProcessOutput;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec};
use crate::tool::{DebloatTool, ToolMode, ToolRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// CallLog
// ---------------------------------------------------------------------------

/// A call made by the harness to one of its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Pull { image: String },
    Start { name: String, image: String },
    Stop { name: String },
    Exec { name: String, command: Vec<String> },
    Ping,
    ImageExists { image: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Runtime(RuntimeCall),
    Tool(ToolRequest),
}

/// Ordered record of calls, shareable between fakes.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Compact labels such as `pull:memcached` or `tool:shadow:memcached`.
    pub fn labels(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|call| match call {
                Call::Runtime(RuntimeCall::Pull { image }) => format!("pull:{image}"),
                Call::Runtime(RuntimeCall::Start { image, .. }) => format!("start:{image}"),
                Call::Runtime(RuntimeCall::Stop { name }) => format!("stop:{name}"),
                Call::Runtime(RuntimeCall::Exec { command, .. }) => format!("exec:{}", command.join(" ")),
                Call::Runtime(RuntimeCall::Ping) => "ping".to_string(),
                Call::Runtime(RuntimeCall::ImageExists { image }) => format!("image_exists:{image}"),
                Call::Tool(request) => format!("tool:{}:{}", request.mode.as_str(), request.image),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// RecordingRuntime
// ---------------------------------------------------------------------------

type ExecResponder = Arc<dyn Fn(&[String]) -> ProcessOutput + Send + Sync>;

/// Container runtime fake. Every operation succeeds unless configured
/// otherwise; `exec` exits 0 with empty output by default.
#[derive(Clone, Default)]
pub struct RecordingRuntime {
    log: CallLog,
    fail_pull: bool,
    fail_start: bool,
    fail_stop: bool,
    daemon_down: bool,
    missing_images: HashSet<String>,
    exec_responder: Option<ExecResponder>,
}

impl std::fmt::Debug for RecordingRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRuntime")
            .field("log", &self.log)
            .field("fail_pull", &self.fail_pull)
            .field("fail_start", &self.fail_start)
            .field("fail_stop", &self.fail_stop)
            .field("daemon_down", &self.daemon_down)
            .field("missing_images", &self.missing_images)
            .finish_non_exhaustive()
    }
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record into `log` instead of a private log.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn failing_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// `ping` always fails.
    pub fn daemon_down(mut self) -> Self {
        self.daemon_down = true;
        self
    }

    /// `image_exists` reports `false` for `image`.
    pub fn missing_image(mut self, image: impl Into<String>) -> Self {
        self.missing_images.insert(image.into());
        self
    }

    pub fn on_exec<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[String]) -> ProcessOutput + Send + Sync + 'static,
    {
        self.exec_responder = Some(Arc::new(responder));
        self
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Runtime calls only, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.log
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Runtime(call) => Some(call),
                Call::Tool(_) => None,
            })
            .collect()
    }

    fn record(&self, call: RuntimeCall) {
        self.log.record(Call::Runtime(call));
    }

    fn refused(&self, operation: &str) -> CollaboratorError {
        CollaboratorError::NonZeroExit {
            program: "fake-runtime".to_string(),
            code: 1,
            stderr: format!("{operation} refused"),
        }
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn pull(&self, image: &ImageIdentity) -> Result<(), CollaboratorError> {
        self.record(RuntimeCall::Pull {
            image: image.to_string(),
        });
        if self.fail_pull {
            return Err(self.refused("pull"));
        }
        Ok(())
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, CollaboratorError> {
        self.record(RuntimeCall::Start {
            name: spec.name.clone(),
            image: spec.image.to_string(),
        });
        if self.fail_start {
            return Err(self.refused("start"));
        }
        Ok(ContainerHandle {
            name: spec.name.clone(),
            image: spec.image.clone(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), CollaboratorError> {
        self.record(RuntimeCall::Stop {
            name: handle.name.clone(),
        });
        if self.fail_stop {
            return Err(self.refused("stop"));
        }
        Ok(())
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        command: &[String],
    ) -> Result<ProcessOutput, CollaboratorError> {
        self.record(RuntimeCall::Exec {
            name: handle.name.clone(),
            command: command.to_vec(),
        });
        Ok(match &self.exec_responder {
            Some(responder) => responder(command),
            None => ProcessOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
            },
        })
    }

    async fn ping(&self) -> Result<(), CollaboratorError> {
        self.record(RuntimeCall::Ping);
        if self.daemon_down {
            return Err(self.refused("ping"));
        }
        Ok(())
    }

    async fn image_exists(&self, image: &ImageIdentity) -> Result<bool, CollaboratorError> {
        self.record(RuntimeCall::ImageExists {
            image: image.to_string(),
        });
        Ok(!self.missing_images.contains(image.as_str()))
    }
}

// ---------------------------------------------------------------------------
// RecordingTool
// ---------------------------------------------------------------------------

/// Debloating tool fake that records requests and can fail per mode.
#[derive(Debug, Clone, Default)]
pub struct RecordingTool {
    log: CallLog,
    failing_modes: HashSet<ToolMode>,
}

impl RecordingTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Exit non-zero for every request in `mode`.
    pub fn failing(mut self, mode: ToolMode) -> Self {
        self.failing_modes.insert(mode);
        self
    }

    pub fn requests(&self) -> Vec<ToolRequest> {
        self.log
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Tool(request) => Some(request),
                Call::Runtime(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl DebloatTool for RecordingTool {
    async fn invoke(&self, request: &ToolRequest) -> Result<ProcessOutput, CollaboratorError> {
        self.log.record(Call::Tool(request.clone()));
        if self.failing_modes.contains(&request.mode) {
            return Err(CollaboratorError::NonZeroExit {
                program: "fake-tool".to_string(),
                code: 2,
                stderr: format!("{} failed", request.mode.as_str()),
            });
        }
        Ok(ProcessOutput {
            exit_code: 0,
            stdout: format!("{} done", request.mode.as_str()),
            stderr: String::new(),
            duration_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> ImageIdentity {
        ImageIdentity::new(name).expect("identity")
    }

    #[tokio::test]
    async fn test_shared_log_preserves_order_across_fakes() {
        let log = CallLog::new();
        let runtime = RecordingRuntime::new().with_log(log.clone());
        let tool = RecordingTool::new().with_log(log.clone());

        runtime.pull(&image("redis")).await.expect("pull");
        tool.invoke(&ToolRequest::shadow(image("redis")))
            .await
            .expect("tool");
        runtime.ping().await.expect("ping");

        assert_eq!(log.labels(), vec!["pull:redis", "tool:shadow:redis", "ping"]);
        assert_eq!(runtime.calls().len(), 2);
        assert_eq!(tool.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let runtime = RecordingRuntime::new()
            .failing_pull()
            .daemon_down()
            .missing_image("redis-baffs");
        assert!(runtime.pull(&image("redis")).await.is_err());
        assert!(runtime.ping().await.is_err());
        assert!(!runtime.image_exists(&image("redis-baffs")).await.expect("inspect"));
        assert!(runtime.image_exists(&image("redis")).await.expect("inspect"));

        let tool = RecordingTool::new().failing(ToolMode::Debloat);
        assert!(tool.invoke(&ToolRequest::shadow(image("redis"))).await.is_ok());
        assert!(tool
            .invoke(&ToolRequest::debloat(image("redis"), None))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_exec_responder() {
        let runtime = RecordingRuntime::new().on_exec(|command| ProcessOutput {
            exit_code: if command[0] == "true" { 0 } else { 1 },
            stdout: command.join(" "),
            stderr: String::new(),
            duration_ms: 0,
        });
        let handle = ContainerHandle {
            name: "tmp".to_string(),
            image: image("redis"),
        };
        let ok = runtime.exec(&handle, &["true".to_string()]).await.expect("exec");
        let bad = runtime.exec(&handle, &["false".to_string()]).await.expect("exec");
        assert!(ok.success());
        assert_eq!(bad.exit_code, 1);
    }
}
