//! The built-in `declarative` suite kind: cases come straight from
//! `workloads.yml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::cases::{CommandTestCase, ExecTestCase, TcpTestCase};
use super::definition::{CaseAction, ReadyCheck, WorkloadDefinition};
use super::{TestCase, WorkloadSuite};
use crate::domain::{ConfigError, ImageIdentity};
use crate::runtime::ContainerSpec;

#[derive(Debug, Clone)]
pub struct DeclarativeSuite {
    name: String,
    definition: WorkloadDefinition,
    dir: PathBuf,
    identity: Option<ImageIdentity>,
}

impl DeclarativeSuite {
    pub fn new(definition: WorkloadDefinition, dir: &Path) -> Self {
        Self {
            name: definition.suite_name(dir),
            definition,
            dir: super::absolute(dir),
            identity: None,
        }
    }

    pub fn definition(&self) -> &WorkloadDefinition {
        &self.definition
    }
}

impl WorkloadSuite for DeclarativeSuite {
    fn name(&self) -> &str {
        &self.name
    }

    fn workload_dir(&self) -> &Path {
        &self.dir
    }

    fn bind_identity(&mut self, identity: ImageIdentity) {
        self.identity = Some(identity);
    }

    fn identity(&self) -> Option<&ImageIdentity> {
        self.identity.as_ref()
    }

    fn container_spec(&self) -> Result<ContainerSpec, ConfigError> {
        let identity = self.require_identity()?;
        Ok(self.definition.container.instantiate(identity, &self.dir))
    }

    fn ready_check(&self) -> &ReadyCheck {
        &self.definition.ready
    }

    fn list_cases(&self) -> Result<Vec<Arc<dyn TestCase>>, ConfigError> {
        self.require_identity()?;
        self.definition
            .cases
            .iter()
            .map(|case| {
                let id = case.id();
                let action = case.action().map_err(|reason| ConfigError::Load {
                    path: WorkloadDefinition::path_in(&self.dir),
                    reason,
                })?;
                let test: Arc<dyn TestCase> = match action {
                    CaseAction::Exec(spec) => Arc::new(ExecTestCase::new(id, spec.clone())),
                    CaseAction::Command(spec) => Arc::new(CommandTestCase::new(id, spec.clone())),
                    CaseAction::Tcp(spec) => Arc::new(TcpTestCase::new(id, spec.clone())),
                };
                Ok(test)
            })
            .collect()
    }
}
