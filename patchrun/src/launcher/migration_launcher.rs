use std::sync::Arc;

use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::engine::{MigrationEngine, MigrationListener, RollbackListener};
use crate::errors::{ErrorKind, PatchError, PatchResult};
use crate::launcher::with_patch_lock;
use crate::store::{PatchInfoStore, SqlPatchInfoStore};
use crate::task::TaskSource;

/// Per-system façade over one [`MigrationEngine`].
///
/// A launcher owns the (context, store) pairs for one logical system — one
/// pair per physical node when a system fans out — and wraps every engine
/// call in the lock protocol and the transaction boundary. These are the
/// entry points an embedding application calls.
///
/// # Examples
///
/// ```rust,ignore
/// use patchrun::{MigrationConfig, MigrationContext, MigrationLauncher};
///
/// let config = MigrationConfig::new().with_patch_location("sql/patches");
/// let launcher = MigrationLauncher::new(config)?;
/// launcher.add_context(MigrationContext::new(my_connection));
/// let applied = launcher.do_migrations()?;
/// ```
#[derive(Clone)]
pub struct MigrationLauncher {
    inner: Arc<MigrationLauncherInner>,
}

struct MigrationLauncherInner {
    config: MigrationConfig,
    engine: MigrationEngine,
    pairs: Atomic<Vec<(MigrationContext, PatchInfoStore)>>,
}

impl MigrationLauncher {
    /// Creates a launcher and its engine from the given configuration.
    ///
    /// # Errors
    ///
    /// Fails with a `ConfigurationError` when the strategy name does not
    /// resolve.
    pub fn new(config: MigrationConfig) -> PatchResult<Self> {
        let engine = MigrationEngine::new(config.clone())?;
        Ok(MigrationLauncher {
            inner: Arc::new(MigrationLauncherInner {
                config,
                engine,
                pairs: atomic(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> MigrationConfig {
        self.inner.config.clone()
    }

    pub fn engine(&self) -> MigrationEngine {
        self.inner.engine.clone()
    }

    /// Adds a node context, backed by the reference SQL patch-info store on
    /// that same context.
    pub fn add_context(&self, context: MigrationContext) {
        let store = PatchInfoStore::new(SqlPatchInfoStore::new(context.clone()));
        self.add_context_with_store(context, store);
    }

    /// Adds a node context paired with a caller-supplied store.
    pub fn add_context_with_store(&self, context: MigrationContext, store: PatchInfoStore) {
        self.inner
            .pairs
            .write_with(|pairs| pairs.push((context, store)));
    }

    pub(crate) fn pairs(&self) -> Vec<(MigrationContext, PatchInfoStore)> {
        self.inner.pairs.read_with(|pairs| pairs.clone())
    }

    pub fn add_task_source<S: TaskSource + 'static>(&self, source: S) {
        self.inner.engine.add_task_source(source);
    }

    pub fn add_migration_listener<L: MigrationListener + 'static>(&self, listener: L) {
        self.inner.engine.add_migration_listener(listener);
    }

    pub fn add_rollback_listener<L: RollbackListener + 'static>(&self, listener: L) {
        self.inner.engine.add_rollback_listener(listener);
    }

    fn require_pairs(&self) -> PatchResult<Vec<(MigrationContext, PatchInfoStore)>> {
        let pairs = self.pairs();
        if pairs.is_empty() {
            return Err(PatchError::new(
                "No migration context has been added to this launcher",
                ErrorKind::ConfigurationError,
            ));
        }
        Ok(pairs)
    }

    /// Applies all outstanding patches on every node of this system.
    ///
    /// Each node is processed under its own patch lock with auto-commit
    /// disabled for the duration. Returns the total number of primary tasks
    /// applied across nodes.
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

    /// Rolls back on every node of this system; see
    /// [`MigrationEngine::do_rollbacks`] for the target semantics.
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

    /// Reads the patch level of the node behind the given context.
    pub fn database_patch_level(&self, context: &MigrationContext) -> PatchResult<i32> {
        for (candidate, store) in self.pairs() {
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

    /// The level the next patch to be written should use.
    pub fn next_patch_level(&self) -> PatchResult<i32> {
        self.inner.engine.next_patch_level()
    }
}
