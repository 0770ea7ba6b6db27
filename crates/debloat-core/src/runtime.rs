//! Container runtime collaborator.
//!
//! The harness never talks to the container daemon directly: it drives the
//! runtime CLI (`docker` by default) through the [`ContainerRuntime`] trait.
//! Tests substitute [`crate::fakes::RecordingRuntime`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::domain::{CollaboratorError, ImageIdentity, RuntimeConfig};
use crate::process::{run_process, ProcessOutput, ProcessSpec};

/// A host directory mounted into a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub target: String,
}

/// Everything needed to start one detached, named container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name; must be unique on the host.
    pub name: String,

    pub image: ImageIdentity,

    /// Network mode (e.g. `host`).
    pub network: Option<String>,

    pub mounts: Vec<Mount>,

    pub env: BTreeMap<String, String>,

    /// Entry command override; the image default when empty.
    pub command: Vec<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: ImageIdentity) -> Self {
        Self {
            name: name.into(),
            image,
            network: None,
            mounts: Vec::new(),
            env: BTreeMap::new(),
            command: Vec::new(),
        }
    }

    /// Arguments for `<runtime> run`.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];
        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}", mount.host.display(), mount.target));
        }
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.image.to_string());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// Handle to a started container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    pub image: ImageIdentity,
}

/// Operations the harness needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image from its registry.
    async fn pull(&self, image: &ImageIdentity) -> Result<(), CollaboratorError>;

    /// Start a detached container.
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, CollaboratorError>;

    /// Stop a container started by [`ContainerRuntime::start`].
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), CollaboratorError>;

    /// Run a command inside a running container. A non-zero exit is
    /// returned as output, not as an error.
    async fn exec(
        &self,
        handle: &ContainerHandle,
        command: &[String],
    ) -> Result<ProcessOutput, CollaboratorError>;

    /// Check that the runtime daemon answers.
    async fn ping(&self) -> Result<(), CollaboratorError>;

    /// Whether an image is present locally.
    async fn image_exists(&self, image: &ImageIdentity) -> Result<bool, CollaboratorError>;
}

/// [`ContainerRuntime`] backed by the docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    command_timeout: Option<Duration>,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, command_timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            command_timeout,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        let timeout = (config.command_timeout_secs > 0)
            .then(|| Duration::from_secs(config.command_timeout_secs));
        Self::new(config.binary.clone(), timeout)
    }

    fn command<I, S>(&self, args: I) -> ProcessSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProcessSpec::new(self.binary.clone())
            .args(args)
            .timeout(self.command_timeout)
    }

    async fn checked(&self, spec: ProcessSpec) -> Result<ProcessOutput, CollaboratorError> {
        run_process(&spec).await?.ensure_success(&self.binary)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull(&self, image: &ImageIdentity) -> Result<(), CollaboratorError> {
        info!(image = %image, "pulling image");
        // Pulls of large images routinely exceed the per-command timeout.
        let spec = ProcessSpec::new(self.binary.clone()).args(["pull", image.as_str()]);
        self.checked(spec).await.map(|_| ())
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, CollaboratorError> {
        info!(container = %spec.name, image = %spec.image, "starting container");
        self.checked(self.command(spec.run_args())).await?;
        Ok(ContainerHandle {
            name: spec.name.clone(),
            image: spec.image.clone(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), CollaboratorError> {
        info!(container = %handle.name, "stopping container");
        self.checked(self.command(["stop", handle.name.as_str()]))
            .await
            .map(|_| ())
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        command: &[String],
    ) -> Result<ProcessOutput, CollaboratorError> {
        let args = ["exec".to_string(), "-i".to_string(), handle.name.clone()]
            .into_iter()
            .chain(command.iter().cloned());
        run_process(&self.command(args)).await
    }

    async fn ping(&self) -> Result<(), CollaboratorError> {
        self.checked(self.command(["info"])).await.map(|_| ())
    }

    async fn image_exists(&self, image: &ImageIdentity) -> Result<bool, CollaboratorError> {
        let output = run_process(&self.command(["image", "inspect", image.as_str()])).await?;
        Ok(output.success())
    }
}
