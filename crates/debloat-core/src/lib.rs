//! Debloat harness core library
//!
//! Domain types, the workload suite model and the external collaborators
//! (container runtime, debloating tool, readiness probes) used by the
//! profile / debloat / validate pipeline.

pub mod container;
pub mod domain;
pub mod fakes;
pub mod process;
pub mod readiness;
pub mod runtime;
pub mod telemetry;
pub mod tool;
pub mod workload;

pub use domain::{
    CaseResult, CaseStatus, CollaboratorError, ConfigError, Configuration, DebloatOptions,
    HarnessError, ImageIdentity, Result, RuntimeConfig, SettleConfig, StageResult, SuiteReport,
    ValidationFailure, CONFIG_FILE_NAME, DEBLOATED_SUFFIX,
};

pub use container::{with_container, RunningContainer};
pub use process::{run_process, ProcessOutput, ProcessSpec};
pub use readiness::{
    settle, DaemonProbe, ExecProbe, ReadinessPolicy, ReadinessProbe, TcpProbe,
};
pub use runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, DockerCli, Mount};
pub use tool::{DebloatTool, ExternalTool, ToolMode, ToolRequest};
pub use workload::{
    CaseContext, CaseError, LoadedWorkload, TestCase, WorkloadDefinition, WorkloadLoader,
    WorkloadRegistry, WorkloadSuite,
};
