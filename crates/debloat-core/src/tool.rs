//! The external debloating tool collaborator.
//!
//! The harness only knows the tool's command-line contract:
//!
//! ```text
//! <tool> shadow  --images=<identity>
//! <tool> debloat --images=<identity> [--top=N]
//! ```
//!
//! and treats a non-zero exit as failure. Output is logged, never parsed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::{CollaboratorError, ImageIdentity};
use crate::process::{run_process, ProcessOutput, ProcessSpec};

/// Tool invocation mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// Instrument the base image and observe what the workload touches.
    Shadow,

    /// Produce `<identity>-baffs` from the observations.
    Debloat,
}

impl ToolMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolMode::Shadow => "shadow",
            ToolMode::Debloat => "debloat",
        }
    }
}

/// One request to the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub mode: ToolMode,
    pub image: ImageIdentity,

    /// Only meaningful for [`ToolMode::Debloat`].
    pub top: Option<u32>,
}

impl ToolRequest {
    pub fn shadow(image: ImageIdentity) -> Self {
        Self {
            mode: ToolMode::Shadow,
            image,
            top: None,
        }
    }

    pub fn debloat(image: ImageIdentity, top: Option<u32>) -> Self {
        Self {
            mode: ToolMode::Debloat,
            image,
            top,
        }
    }

    /// Command-line arguments following the tool path.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.mode.as_str().to_string(),
            format!("--images={}", self.image),
        ];
        if self.mode == ToolMode::Debloat {
            if let Some(top) = self.top {
                args.push(format!("--top={top}"));
            }
        }
        args
    }
}

/// The debloating tool as seen by the stage runner.
#[async_trait]
pub trait DebloatTool: Send + Sync {
    /// Run the tool and fail on a non-zero exit.
    async fn invoke(&self, request: &ToolRequest) -> Result<ProcessOutput, CollaboratorError>;
}

/// [`DebloatTool`] backed by an executable on disk.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    path: PathBuf,
    timeout: Option<Duration>,
}

impl ExternalTool {
    pub fn new(path: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DebloatTool for ExternalTool {
    async fn invoke(&self, request: &ToolRequest) -> Result<ProcessOutput, CollaboratorError> {
        let program = self.path.display().to_string();
        let spec = ProcessSpec::new(program.clone())
            .args(request.args())
            .timeout(self.timeout);

        info!(tool = %program, mode = request.mode.as_str(), image = %request.image, "invoking debloat tool");
        let output = run_process(&spec).await?;
        debug!(stdout = %output.stdout, stderr = %output.stderr, "debloat tool output");

        let output = output.ensure_success(&program)?;
        info!(mode = request.mode.as_str(), duration_ms = output.duration_ms, "debloat tool finished");
        Ok(output)
    }
}
