use std::sync::Arc;

use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::engine::DistributedMigrationEngine;
use crate::errors::{ErrorKind, PatchError, PatchResult};
use crate::launcher::{with_patch_lock, MigrationLauncher};
use crate::store::{PatchInfoStore, SqlPatchInfoStore};

/// Façade for distributed mode: one driving system orchestrating a fleet of
/// controlled systems.
///
/// The driving (context, store) pair holds the flattened patch level and the
/// lock that serializes fleet-wide runs; controlled systems are registered as
/// sub-launchers and keep exclusive ownership of their own stores. Only the
/// driving store is locked — the controlled stores are never contended
/// because all mutation flows through the one driving process.
#[derive(Clone)]
pub struct DistributedMigrationLauncher {
    inner: Arc<DistributedLauncherInner>,
}

struct DistributedLauncherInner {
    config: MigrationConfig,
    engine: DistributedMigrationEngine,
    pairs: Atomic<Vec<(MigrationContext, PatchInfoStore)>>,
}

impl DistributedMigrationLauncher {
    pub fn new(config: MigrationConfig) -> PatchResult<Self> {
        let engine = DistributedMigrationEngine::new(config.clone())?;
        Ok(DistributedMigrationLauncher {
            inner: Arc::new(DistributedLauncherInner {
                config,
                engine,
                pairs: atomic(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> MigrationConfig {
        self.inner.config.clone()
    }

    pub fn engine(&self) -> DistributedMigrationEngine {
        self.inner.engine.clone()
    }

    /// Registers a controlled system behind its own sub-launcher.
    pub fn add_controlled_system(&self, name: &str, launcher: MigrationLauncher) {
        self.inner.engine.add_controlled_system(name, launcher);
    }

    /// Adds the driving context, backed by the reference SQL patch-info
    /// store on that same context.
    pub fn add_context(&self, context: MigrationContext) {
        let store = PatchInfoStore::new(SqlPatchInfoStore::new(context.clone()));
        self.add_context_with_store(context, store);
    }

    /// Adds the driving context paired with a caller-supplied store.
    pub fn add_context_with_store(&self, context: MigrationContext, store: PatchInfoStore) {
        self.inner
            .pairs
            .write_with(|pairs| pairs.push((context, store)));
    }

    fn require_pairs(&self) -> PatchResult<Vec<(MigrationContext, PatchInfoStore)>> {
        let pairs = self.inner.pairs.read_with(|pairs| pairs.clone());
        if pairs.is_empty() {
            return Err(PatchError::new(
                "No driving context has been added to this launcher",
                ErrorKind::ConfigurationError,
            ));
        }
        Ok(pairs)
    }

    /// Runs outstanding migrations across the whole fleet under the driving
    /// store's lock.
    pub fn do_migrations(&self) -> PatchResult<usize> {
        let mut total = 0;
        for (context, store) in self.require_pairs()? {
            let engine = self.engine();
            total += with_patch_lock(&self.inner.config, &store, &context, || {
                engine.do_migrations(&store, &context)
            })?;
        }
        Ok(total)
    }

    /// Rolls back across the fleet under the driving store's lock.
    pub fn do_rollbacks(&self, targets: &[i32], force_rollback: bool) -> PatchResult<usize> {
        let mut total = 0;
        for (context, store) in self.require_pairs()? {
            let engine = self.engine();
            total += with_patch_lock(&self.inner.config, &store, &context, || {
                engine.do_rollbacks(&store, targets, &context, force_rollback)
            })?;
        }
        Ok(total)
    }

    /// Reads the driving system's patch level behind the given context.
    pub fn database_patch_level(&self, context: &MigrationContext) -> PatchResult<i32> {
        for (candidate, store) in self.inner.pairs.read_with(|pairs| pairs.clone()) {
            if candidate.same_as(context) {
                store.create_if_needed()?;
                return store.patch_level();
            }
        }
        Err(PatchError::new(
            &format!(
                "Context '{}' is not managed by this launcher",
                context.system_name()
            ),
            ErrorKind::ConfigurationError,
        ))
    }

    /// One above the highest level across all controlled systems, or 1.
    pub fn next_patch_level(&self) -> PatchResult<i32> {
        self.inner.engine.next_patch_level()
    }
}
