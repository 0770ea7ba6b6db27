//! Suite registry and workload directory loader.
//!
//! Suite kinds are registered by name; `workloads.yml` selects one through
//! its `kind` field. Every load builds a fresh suite instance, so an
//! identity bound during one stage never leaks into the next.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::declarative::DeclarativeSuite;
use super::definition::{WorkloadDefinition, DEFAULT_KIND};
use super::WorkloadSuite;
use crate::domain::{ConfigError, ImageIdentity};

/// Builds a suite from a parsed definition and its directory.
pub type SuiteFactory = Arc<
    dyn Fn(&WorkloadDefinition, &Path) -> Result<Box<dyn WorkloadSuite>, ConfigError> + Send + Sync,
>;

/// Suite kinds by name.
#[derive(Clone)]
pub struct WorkloadRegistry {
    factories: BTreeMap<String, SuiteFactory>,
}

impl WorkloadRegistry {
    /// A registry with no kinds at all.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&WorkloadDefinition, &Path) -> Result<Box<dyn WorkloadSuite>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(
        &self,
        definition: &WorkloadDefinition,
        dir: &Path,
    ) -> Result<Box<dyn WorkloadSuite>, ConfigError> {
        let factory = self
            .factories
            .get(&definition.kind)
            .ok_or_else(|| ConfigError::UnknownKind(definition.kind.clone()))?;
        factory(definition, dir)
    }
}

impl Default for WorkloadRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DEFAULT_KIND, |definition, dir| {
            Ok(Box::new(DeclarativeSuite::new(definition.clone(), dir)))
        });
        registry
    }
}

impl fmt::Debug for WorkloadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// A suite freshly loaded from a workload directory.
pub struct LoadedWorkload {
    pub suite: Box<dyn WorkloadSuite>,
    pub directory: PathBuf,

    /// SHA-256 of `workloads.yml`, recorded in stage reports.
    pub definition_digest: String,
}

impl LoadedWorkload {
    /// Bind the identity under test; required before discovery.
    pub fn bind(&mut self, identity: ImageIdentity) {
        info!(suite = %self.suite.name(), identity = %identity, "binding workload identity");
        self.suite.bind_identity(identity);
    }
}

impl fmt::Debug for LoadedWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedWorkload")
            .field("suite", &self.suite.name())
            .field("identity", &self.suite.identity())
            .field("directory", &self.directory)
            .field("definition_digest", &self.definition_digest)
            .finish()
    }
}

/// Loads workload directories through a [`WorkloadRegistry`].
#[derive(Debug, Clone, Default)]
pub struct WorkloadLoader {
    registry: WorkloadRegistry,
}

impl WorkloadLoader {
    pub fn new(registry: WorkloadRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &WorkloadRegistry {
        &self.registry
    }

    /// Parse `workloads.yml` in `dir` and build a fresh, unbound suite.
    pub fn load(&self, dir: &Path) -> Result<LoadedWorkload, ConfigError> {
        if !dir.is_dir() {
            return Err(ConfigError::NotFound {
                path: dir.to_path_buf(),
            });
        }
        let (definition, digest) = WorkloadDefinition::load(dir)?;
        debug!(kind = %definition.kind, digest = %digest, "workload definition parsed");
        let suite = self.registry.create(&definition, dir)?;
        Ok(LoadedWorkload {
            suite,
            directory: dir.to_path_buf(),
            definition_digest: digest,
        })
    }

    /// [`WorkloadLoader::load`] followed by [`LoadedWorkload::bind`].
    pub fn load_bound(&self, dir: &Path, identity: ImageIdentity) -> Result<LoadedWorkload, ConfigError> {
        let mut workload = self.load(dir)?;
        workload.bind(identity);
        Ok(workload)
    }
}
