//! Debloat pipeline - profile, debloat and validate stages
//!
//! Provides the stage orchestrator that:
//! - Loads `config.yml` and the workload suite for a directory
//! - Drives the debloating tool and the container runtime per stage
//! - Gates workload results by stage policy and reports the outcome

pub mod gate;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod stage;
pub mod suite;

pub use gate::{GateVerdict, StageGate};
pub use orchestrator::{Orchestrator, ProcessOutcome};
pub use report::StageReport;
pub use runner::StageRunner;
pub use stage::{FailurePolicy, Stage, UnknownStage};
pub use suite::run_workload;
