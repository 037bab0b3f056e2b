use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::errors::{ErrorKind, PatchError, PatchResult};
use crate::launcher::MigrationLauncher;
use crate::store::PatchInfoStore;
use crate::strategy::{resolve_strategy, RunStrategy};
use crate::task::MigrationTask;

/// Orchestrates patching across a fleet of independently versioned
/// controlled systems from one driving process.
///
/// Every controlled system contributes its tasks to one flattened,
/// uniquely-levelled set tracked by the driving store. Before a run, every
/// controlled store must be in sync with the driving store; `force_sync`
/// downgrades that from fatal to tolerated and switches task execution to a
/// per-context decision so late-joining nodes catch up without replaying
/// history on current ones.
///
/// The engine reads controlled stores only through snapshots; each
/// controlled system's store is mutated exclusively for tasks executed
/// against that system.
#[derive(Clone)]
pub struct DistributedMigrationEngine {
    inner: Arc<DistributedEngineInner>,
}

struct DistributedEngineInner {
    config: MigrationConfig,
    strategy: Arc<dyn RunStrategy>,
    controlled: Atomic<IndexMap<String, MigrationLauncher>>,
}

impl DistributedMigrationEngine {
    /// Creates a distributed engine; resolves the strategy name eagerly so a
    /// bad configuration fails before any store is touched.
    pub fn new(config: MigrationConfig) -> PatchResult<Self> {
        let strategy = resolve_strategy(&config.strategy_name())?;
        Ok(DistributedMigrationEngine {
            inner: Arc::new(DistributedEngineInner {
                config,
                strategy,
                controlled: atomic(IndexMap::new()),
            }),
        })
    }

    pub fn config(&self) -> MigrationConfig {
        self.inner.config.clone()
    }

    /// Registers a controlled system behind its own sub-launcher. The
    /// registry is built at configuration time and only read during runs.
    pub fn add_controlled_system(&self, name: &str, launcher: MigrationLauncher) {
        self.inner
            .controlled
            .write_with(|systems| systems.insert(name.to_string(), launcher));
    }

    pub fn controlled_system_names(&self) -> Vec<String> {
        self.inner
            .controlled
            .read_with(|systems| systems.keys().cloned().collect())
    }

    fn controlled_systems(&self) -> IndexMap<String, MigrationLauncher> {
        self.inner.controlled.read_with(|systems| systems.clone())
    }

    /// Flattens every controlled system's tasks into one ascending set.
    ///
    /// # Errors
    ///
    /// A level claimed by tasks of two systems (or twice within one) is a
    /// fatal `ValidationError` naming both owners.
    pub fn flattened_tasks(&self) -> PatchResult<Vec<(MigrationTask, String, MigrationLauncher)>> {
        let mut flattened: Vec<(MigrationTask, String, MigrationLauncher)> = Vec::new();
        let mut owners: HashMap<i32, (String, String)> = HashMap::new();

        for (system, launcher) in self.controlled_systems() {
            for task in launcher.engine().migration_tasks()? {
                if let Some((other_task, other_system)) = owners.get(&task.level()) {
                    log::error!(
                        "Patch level {} claimed by '{}' of system '{}' and '{}' of system '{}'",
                        task.level(),
                        other_task,
                        other_system,
                        task.name(),
                        system
                    );
                    return Err(PatchError::new(
                        &format!(
                            "Patch level {} is claimed by '{}' of system '{}' and '{}' of \
                             system '{}'; levels must be unique across controlled systems",
                            task.level(),
                            other_task,
                            other_system,
                            task.name(),
                            system
                        ),
                        ErrorKind::ValidationError,
                    ));
                }
                owners.insert(task.level(), (task.name(), system.clone()));
                flattened.push((task, system.clone(), launcher.clone()));
            }
        }

        flattened.sort_by_key(|(task, _, _)| task.level());
        Ok(flattened)
    }

    /// One above the highest level across all controlled systems, or 1.
    pub fn next_patch_level(&self) -> PatchResult<i32> {
        let flattened = self.flattened_tasks()?;
        Ok(flattened
            .iter()
            .map(|(task, _, _)| task.level())
            .max()
            .map_or(1, |max| max + 1))
    }

    /// Validates that every controlled store matches the driving store.
    ///
    /// Fatal unless `force_sync` is configured, in which case each mismatch
    /// is logged and tolerated; the per-context run decision reconciles it.
    fn validate_sync(&self, driving_store: &PatchInfoStore) -> PatchResult<()> {
        let driving_snapshot = driving_store.snapshot()?;
        let force_sync = self.inner.config.is_force_sync();

        for (system, launcher) in self.controlled_systems() {
            for (context, store) in launcher.pairs() {
                store.create_if_needed()?;
                let snapshot = store.snapshot()?;
                if !self.inner.strategy.is_sync(&driving_snapshot, &snapshot) {
                    if force_sync {
                        log::warn!(
                            "Controlled system '{}' (context '{}') is at level {} while the \
                             driving system is at {}; forcing synchronization",
                            system,
                            context.system_name(),
                            snapshot.patch_level,
                            driving_snapshot.patch_level
                        );
                    } else {
                        return Err(PatchError::new(
                            &format!(
                                "Controlled system '{}' (context '{}') is at patch level {} but \
                                 the driving system is at {}; systems must be in sync",
                                system,
                                context.system_name(),
                                snapshot.patch_level,
                                driving_snapshot.patch_level
                            ),
                            ErrorKind::SyncError,
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs outstanding migrations across the fleet.
    ///
    /// Without `force_sync`, a task runs against every context of its owning
    /// sub-launcher whenever the driving store says it should. With
    /// `force_sync`, the decision moves to each context's own store, so only
    /// out-of-sync contexts execute the task.
    pub fn do_migrations(
        &self,
        driving_store: &PatchInfoStore,
        context: &MigrationContext,
    ) -> PatchResult<usize> {
        let flattened = self.flattened_tasks()?;
        self.validate_sync(driving_store)?;

        let strategy = self.inner.strategy.clone();
        let force_sync = self.inner.config.is_force_sync();
        let driving_system = context.system_name();

        let snapshot = driving_store.snapshot()?;
        let outstanding = flattened
            .iter()
            .filter(|(task, _, _)| strategy.should_run(task.level(), &snapshot))
            .count();
        log::info!(
            "Driving system '{}' is at patch level {}; {} of {} task(s) outstanding across {} \
             controlled system(s)",
            driving_system,
            snapshot.patch_level,
            outstanding,
            flattened.len(),
            self.controlled_system_names().len()
        );

        if self.inner.config.is_read_only() {
            if outstanding > 0 {
                return Err(PatchError::new(
                    &format!(
                        "Driving system '{}' has {} outstanding patch(es) but is running read-only",
                        driving_system, outstanding
                    ),
                    ErrorKind::ReadOnlyViolation,
                ));
            }
            return Ok(0);
        }

        let mut applied = 0;
        for (task, system, owner) in &flattened {
            let driving_runnable =
                strategy.should_run(task.level(), &driving_store.snapshot()?);
            if !force_sync && !driving_runnable {
                continue;
            }

            let mut ran = 0;
            for (task_context, store) in owner.pairs() {
                let run_here = !force_sync
                    || strategy.should_run(task.level(), &store.snapshot()?);
                if run_here {
                    let outcome = owner.engine().apply_task(task, &task_context)?;
                    store.update_patch_level(outcome.level)?;
                    ran += 1;
                } else {
                    log::debug!(
                        "Context '{}' of system '{}' already has level {}; skipping",
                        task_context.system_name(),
                        system,
                        task.level()
                    );
                }
            }

            if driving_runnable {
                driving_store.update_patch_level(task.level())?;
            }
            if ran > 0 || driving_runnable {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Rolls back across the fleet, mirroring [`do_migrations`]: candidates
    /// come from the strategy against the driving store, the synchronization
    /// precondition is the same, and with `force_sync` a context is only
    /// unwound when it actually has the patch.
    ///
    /// [`do_migrations`]: DistributedMigrationEngine::do_migrations
    pub fn do_rollbacks(
        &self,
        driving_store: &PatchInfoStore,
        targets: &[i32],
        context: &MigrationContext,
        force_rollback: bool,
    ) -> PatchResult<usize> {
        let flattened = self.flattened_tasks()?;
        self.validate_sync(driving_store)?;

        let strategy = self.inner.strategy.clone();
        let force_sync = self.inner.config.is_force_sync();
        let driving_system = context.system_name();

        let tasks: Vec<MigrationTask> =
            flattened.iter().map(|(task, _, _)| task.clone()).collect();
        let mut owners: HashMap<i32, (String, MigrationLauncher)> = HashMap::new();
        for (task, system, launcher) in &flattened {
            owners.insert(task.level(), (system.clone(), launcher.clone()));
        }

        let candidates =
            strategy.rollback_candidates(&tasks, targets, &driving_store.snapshot()?)?;

        let non_capable: Vec<String> = candidates
            .iter()
            .filter(|task| !task.supports_rollback())
            .map(|task| task.name())
            .collect();
        if !non_capable.is_empty() && !force_rollback {
            return Err(PatchError::new(
                &format!(
                    "Task(s) {} cannot be rolled back; use force to override",
                    non_capable.iter().join(", ")
                ),
                ErrorKind::RollbackError,
            ));
        }

        if self.inner.config.is_read_only() {
            if !candidates.is_empty() {
                return Err(PatchError::new(
                    &format!(
                        "Driving system '{}' has {} patch(es) to roll back but is running \
                         read-only",
                        driving_system,
                        candidates.len()
                    ),
                    ErrorKind::ReadOnlyViolation,
                ));
            }
            return Ok(0);
        }

        log::info!(
            "Rolling back {} task(s) across controlled systems of '{}'",
            candidates.len(),
            driving_system
        );

        let mut executed = 0;
        for task in &candidates {
            let (system, owner) = owners
                .get(&task.level())
                .ok_or_else(|| {
                    PatchError::new(
                        &format!(
                            "Rollback candidate at level {} has no owning controlled system",
                            task.level()
                        ),
                        ErrorKind::InternalError,
                    )
                })?
                .clone();

            for (task_context, store) in owner.pairs() {
                let present_here = !force_sync
                    || !strategy.should_run(task.level(), &store.snapshot()?);
                if !present_here {
                    log::debug!(
                        "Context '{}' of system '{}' never had level {}; skipping rollback",
                        task_context.system_name(),
                        system,
                        task.level()
                    );
                    continue;
                }
                if task.supports_rollback() {
                    owner.engine().apply_rollback(task, &task_context)?;
                } else {
                    log::warn!(
                        "Task '{}' has no down action; forcing level {} out of system '{}'",
                        task.name(),
                        task.level(),
                        system
                    );
                }
                store.update_patch_level_after_rollback(task.level())?;
            }

            driving_store.update_patch_level_after_rollback(task.level())?;
            executed += 1;
        }

        let remaining = strategy
            .rollback_candidates(&tasks, targets, &driving_store.snapshot()?)?
            .len();
        Ok(executed - remaining)
    }
}
