//! Debloat harness CLI
//!
//! The `debloat` command drives one stage of the image debloating workflow
//! for a workload directory holding `config.yml` and `workloads.yml`.
//!
//! ## Actions
//!
//! - `profile`: run the workload against the base image under shadow mode
//! - `debloat`: produce `<image>-baffs` from the collected profile
//! - `validate`: run the workload against `<image>-baffs`; every case must pass

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

use debloat_core::telemetry::{init_tracing, level_for};
use debloat_core::HarnessError;
use debloat_pipeline::{Orchestrator, ProcessOutcome, Stage, StageReport};

#[derive(Parser, Debug)]
#[command(name = "debloat")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Profile, debloat and validate container images against a workload", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Write the stage report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Stage to run
    #[arg(value_enum)]
    action: Action,

    /// Workload directory containing config.yml and workloads.yml
    directory: PathBuf,

    /// Path to the debloating tool executable
    tool_path: PathBuf,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Profile,
    Debloat,
    Validate,
}

impl From<Action> for Stage {
    fn from(action: Action) -> Self {
        match action {
            Action::Profile => Stage::Profile,
            Action::Debloat => Stage::Debloat,
            Action::Validate => Stage::Validate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for(cli.verbose));

    let stage = Stage::from(cli.action);
    info!(stage = %stage, directory = %cli.directory.display(), tool = %cli.tool_path.display(), "debloat harness starting");

    let outcome = Orchestrator::external(&cli.tool_path)
        .load_and_run(stage, &cli.directory)
        .await;

    for line in render(stage, &outcome) {
        println!("{line}");
    }
    if let Some(error) = outcome.error() {
        if !matches!(error, HarnessError::Validation(_)) {
            eprintln!("error: {error}");
        }
    }

    // The stage outcome decides the exit code, not the report file.
    if let (Some(path), Some(report)) = (&cli.report, outcome.report()) {
        if let Err(e) = write_report(path, report) {
            error!(error = %format!("{e:#}"), "failed to write stage report");
        }
    }

    Ok(ExitCode::from(outcome.exit_code() as u8))
}

fn write_report(path: &Path, report: &StageReport) -> Result<()> {
    let json = report.to_json().context("Failed to serialize stage report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "stage report written");
    Ok(())
}

/// Lines printed to stdout for a finished stage.
fn render(stage: Stage, outcome: &ProcessOutcome) -> Vec<String> {
    let mut lines: Vec<String> = outcome
        .report()
        .map(|report| report.cases().iter().map(|case| case.summary_line()).collect())
        .unwrap_or_default();

    match (stage, outcome) {
        (Stage::Validate, ProcessOutcome::Success { .. }) => {
            lines.push("Validation successful".to_string());
        }
        (Stage::Validate, ProcessOutcome::Failure { error, .. }) => {
            if let HarnessError::Validation(failure) = error {
                lines.push(String::new());
                lines.push(failure.to_string());
            }
            lines.push("Validation failed".to_string());
        }
        (Stage::Profile, ProcessOutcome::Success { verdict, .. }) => {
            lines.push(format!("Profiling finished: {}", verdict.message));
        }
        (Stage::Debloat, ProcessOutcome::Success { report, .. }) => {
            lines.push(format!("Debloated image: {}", report.base_identity.debloated()));
        }
        (_, ProcessOutcome::Failure { .. }) => {
            lines.push(format!("{} failed", stage));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use debloat_core::{CaseResult, CaseStatus, ConfigError, ImageIdentity, ValidationFailure};

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_positional_arguments() {
        let cli = Cli::try_parse_from(["debloat", "validate", "/work/redis", "/usr/bin/baffs"])
            .expect("parse");
        assert_eq!(cli.action, Action::Validate);
        assert_eq!(cli.directory, PathBuf::from("/work/redis"));
        assert_eq!(cli.tool_path, PathBuf::from("/usr/bin/baffs"));
        assert!(cli.report.is_none());
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "debloat", "--verbose", "--json", "--report", "out.json", "profile", "dir", "tool",
        ])
        .expect("parse");
        assert!(cli.verbose);
        assert!(cli.json);
        assert_eq!(cli.report, Some(PathBuf::from("out.json")));
        assert_eq!(Stage::from(cli.action), Stage::Profile);
    }

    #[test]
    fn test_rejects_unknown_action_and_missing_arguments() {
        assert!(Cli::try_parse_from(["debloat", "shadow", "dir", "tool"]).is_err());
        assert!(Cli::try_parse_from(["debloat", "validate", "dir"]).is_err());
    }

    #[test]
    fn test_render_validation_failure() {
        let failure = ValidationFailure {
            identity: ImageIdentity::new("demo-baffs").expect("identity"),
            failures: vec![CaseResult::new(
                "TestDemo::get",
                CaseStatus::Failed,
                Some("expected +OK".into()),
                1,
            )],
        };
        let outcome = ProcessOutcome::Failure {
            error: failure.into(),
            report: None,
        };
        let lines = render(Stage::Validate, &outcome);
        assert_eq!(lines.last().map(String::as_str), Some("Validation failed"));
        assert!(lines.iter().any(|l| l.contains("TestDemo::get ... FAIL: expected +OK")));
    }

    fn sample_report() -> StageReport {
        let base = ImageIdentity::new("demo").expect("identity");
        StageReport::begin(Stage::Debloat, base, Path::new("/w")).finish()
    }

    #[test]
    fn test_write_report_errors_on_unwritable_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = sample_report();
        let missing = dir.path().join("no-such-dir").join("report.json");
        let err = write_report(&missing, &report).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to write report"));

        let path = dir.path().join("report.json");
        write_report(&path, &report).expect("write");
        let json = std::fs::read_to_string(&path).expect("read back");
        assert!(json.contains("\"stage\": \"debloat\""));
    }

    #[test]
    fn test_render_config_failure() {
        let outcome = ProcessOutcome::Failure {
            error: ConfigError::NotFound {
                path: PathBuf::from("/w/config.yml"),
            }
            .into(),
            report: None,
        };
        assert_eq!(render(Stage::Profile, &outcome), vec!["profile failed"]);
    }
}
