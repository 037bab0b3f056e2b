use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::engine::events::{ListenerRegistry, TaskOutcome};
use crate::engine::{MigrationListener, RollbackListener};
use crate::errors::{ErrorKind, PatchError, PatchResult};
use crate::store::PatchInfoStore;
use crate::strategy::{resolve_strategy, RunStrategy};
use crate::task::{MigrationTask, SqlScriptTaskSource, TaskSource};

/// Single-system migration orchestrator.
///
/// Combines task discovery, level validation, the run strategy, and the
/// transactional apply/rollback primitive into the forward and rollback
/// algorithms. The engine owns no contexts or stores; the launcher hands
/// them in per call.
///
/// # Responsibilities
///
/// * **Discovery**: collect tasks from every source at every configured
///   location, fresh on each invocation
/// * **Validation**: duplicate patch levels are fatal before anything runs
/// * **Ordering**: tasks execute strictly ascending by level
/// * **Policy**: the run strategy decides what should run and what rolls back
/// * **Events**: lifecycle listeners fire around every task in registration
///   order
/// * **Persistence**: the engine records level changes itself from each
///   [`TaskOutcome`]; listeners only observe
#[derive(Clone)]
pub struct MigrationEngine {
    inner: Arc<MigrationEngineInner>,
}

impl std::fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngine").finish_non_exhaustive()
    }
}

struct MigrationEngineInner {
    config: MigrationConfig,
    strategy: Arc<dyn RunStrategy>,
    sources: Atomic<Vec<Arc<dyn TaskSource>>>,
    listeners: ListenerRegistry,
}

impl MigrationEngine {
    /// Creates an engine for the given configuration.
    ///
    /// The strategy name is resolved here so a bad configuration fails
    /// before any store or context is touched. The SQL script source is
    /// always installed; additional sources may be registered with
    /// [`add_task_source`].
    ///
    /// [`add_task_source`]: MigrationEngine::add_task_source
    pub fn new(config: MigrationConfig) -> PatchResult<Self> {
        let strategy = resolve_strategy(&config.strategy_name())?;
        let sources: Vec<Arc<dyn TaskSource>> = vec![Arc::new(SqlScriptTaskSource::new())];
        Ok(MigrationEngine {
            inner: Arc::new(MigrationEngineInner {
                config,
                strategy,
                sources: atomic(sources),
                listeners: ListenerRegistry::new(),
            }),
        })
    }

    pub fn config(&self) -> MigrationConfig {
        self.inner.config.clone()
    }

    pub(crate) fn strategy(&self) -> Arc<dyn RunStrategy> {
        self.inner.strategy.clone()
    }

    pub fn add_task_source<S: TaskSource + 'static>(&self, source: S) {
        self.inner
            .sources
            .write_with(|sources| sources.push(Arc::new(source)));
    }

    pub fn add_migration_listener<L: MigrationListener + 'static>(&self, listener: L) {
        self.inner.listeners.add_migration_listener(Arc::new(listener));
    }

    pub fn add_rollback_listener<L: RollbackListener + 'static>(&self, listener: L) {
        self.inner.listeners.add_rollback_listener(Arc::new(listener));
    }

    fn sources(&self) -> Vec<Arc<dyn TaskSource>> {
        self.inner.sources.read_with(|sources| sources.clone())
    }

    /// Discovers, validates, and orders the primary task set.
    ///
    /// # Errors
    ///
    /// Two tasks sharing a level is a fatal `ValidationError` naming both.
    pub fn migration_tasks(&self) -> PatchResult<Vec<MigrationTask>> {
        let mut tasks = Vec::new();
        for location in self.inner.config.patch_locations() {
            for source in self.sources() {
                tasks.extend(source.migration_tasks(&location)?);
            }
        }
        self.validate_unique_levels(&tasks)?;
        tasks.sort_by_key(|task| task.level());
        Ok(tasks)
    }

    /// Discovers post-patch tasks; these run on every pass in discovery
    /// order and never touch the patch level.
    pub fn post_patch_tasks(&self) -> PatchResult<Vec<MigrationTask>> {
        let mut tasks = Vec::new();
        for location in self.inner.config.post_patch_locations() {
            for source in self.sources() {
                tasks.extend(source.post_patch_tasks(&location)?);
            }
        }
        Ok(tasks)
    }

    /// The level the next patch to be written should use: one above the
    /// highest discovered level, or 1 when nothing is discovered yet.
    pub fn next_patch_level(&self) -> PatchResult<i32> {
        let tasks = self.migration_tasks()?;
        Ok(tasks.iter().map(|t| t.level()).max().map_or(1, |max| max + 1))
    }

    fn validate_unique_levels(&self, tasks: &[MigrationTask]) -> PatchResult<()> {
        let mut seen: HashMap<i32, String> = HashMap::new();
        for task in tasks {
            if let Some(previous) = seen.insert(task.level(), task.name()) {
                log::error!(
                    "Patch level {} claimed by both '{}' and '{}'",
                    task.level(),
                    previous,
                    task.name()
                );
                return Err(PatchError::new(
                    &format!(
                        "Patch level {} is claimed by both '{}' and '{}'; levels must be unique",
                        task.level(),
                        previous,
                        task.name()
                    ),
                    ErrorKind::ValidationError,
                ));
            }
        }
        Ok(())
    }

    /// Runs all outstanding migrations against one system.
    ///
    /// Returns the number of primary tasks applied. In read-only mode,
    /// outstanding work is fatal and a clean system returns 0.
    pub fn do_migrations(
        &self,
        store: &PatchInfoStore,
        context: &MigrationContext,
    ) -> PatchResult<usize> {
        let system = context.system_name();
        let tasks = self.migration_tasks()?;
        let snapshot = store.snapshot()?;
        let strategy = self.strategy();

        let runnable: Vec<&MigrationTask> = tasks
            .iter()
            .filter(|task| strategy.should_run(task.level(), &snapshot))
            .collect();
        log::info!(
            "System '{}' is at patch level {}; {} of {} task(s) to run",
            system,
            snapshot.patch_level,
            runnable.len(),
            tasks.len()
        );

        if self.inner.config.is_read_only() {
            if !runnable.is_empty() {
                return Err(PatchError::new(
                    &format!(
                        "System '{}' has {} outstanding patch(es) but is running read-only",
                        system,
                        runnable.len()
                    ),
                    ErrorKind::ReadOnlyViolation,
                ));
            }
            log::info!("System '{}' is up to date (read-only check)", system);
            return Ok(0);
        }

        let mut applied = 0;
        for task in runnable {
            let outcome = self.apply_task(task, context)?;
            store.update_patch_level(outcome.level)?;
            applied += 1;
        }

        for task in self.post_patch_tasks()? {
            log::info!("Running post-patch task '{}' on system '{}'", task.name(), system);
            self.apply_task(&task, context)?;
        }

        Ok(applied)
    }

    /// Rolls the system back according to the strategy's reading of
    /// `targets`.
    ///
    /// Every candidate must be rollback-capable unless `force_rollback` is
    /// set; forcing skips the down action of non-capable tasks but still
    /// removes their levels from the store. Returns the number of candidates
    /// whose rollback stuck.
    pub fn do_rollbacks(
        &self,
        store: &PatchInfoStore,
        targets: &[i32],
        context: &MigrationContext,
        force_rollback: bool,
    ) -> PatchResult<usize> {
        let system = context.system_name();
        let tasks = self.migration_tasks()?;
        let snapshot = store.snapshot()?;
        let strategy = self.strategy();

        let candidates = strategy.rollback_candidates(&tasks, targets, &snapshot)?;

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
                        "System '{}' has {} patch(es) to roll back but is running read-only",
                        system,
                        candidates.len()
                    ),
                    ErrorKind::ReadOnlyViolation,
                ));
            }
            return Ok(0);
        }

        log::info!(
            "Rolling back {} task(s) on system '{}'",
            candidates.len(),
            system
        );

        let mut executed = 0;
        for task in &candidates {
            if task.supports_rollback() {
                let outcome = self.apply_rollback(task, context)?;
                store.update_patch_level_after_rollback(outcome.level)?;
            } else {
                log::warn!(
                    "Task '{}' has no down action; forcing level {} out of the store",
                    task.name(),
                    task.level()
                );
                store.update_patch_level_after_rollback(task.level())?;
            }
            executed += 1;
        }

        let after = store.snapshot()?;
        let remaining = strategy.rollback_candidates(&tasks, targets, &after)?.len();
        Ok(executed - remaining)
    }

    /// The transactional apply primitive.
    ///
    /// Broadcasts "started", runs the up action, then either broadcasts
    /// "successful" and commits, or broadcasts "failed", rolls the context
    /// back best-effort, and re-raises, aborting the remaining sequence.
    pub(crate) fn apply_task(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
    ) -> PatchResult<TaskOutcome> {
        self.inner.listeners.notify_migration_started(task, context)?;
        log::info!(
            "Applying task '{}' (level {}) to system '{}'",
            task.name(),
            task.level(),
            context.system_name()
        );
        match task.migrate(context) {
            Ok(()) => {
                self.inner
                    .listeners
                    .notify_migration_successful(task, context)?;
                context.commit()?;
                Ok(TaskOutcome {
                    task_name: task.name(),
                    level: task.level(),
                })
            }
            Err(error) => {
                self.inner
                    .listeners
                    .notify_migration_failed(task, context, &error);
                log::error!(
                    "Task '{}' failed on system '{}': {}",
                    task.name(),
                    context.system_name(),
                    error.message()
                );
                if let Err(rollback_error) = context.rollback() {
                    log::error!(
                        "Context rollback after failed task '{}' also failed: {}",
                        task.name(),
                        rollback_error.message()
                    );
                }
                Err(PatchError::new_with_cause(
                    &format!("Migration task '{}' failed", task.name()),
                    ErrorKind::MigrationError,
                    error,
                ))
            }
        }
    }

    /// Rollback variant of the apply primitive.
    pub(crate) fn apply_rollback(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
    ) -> PatchResult<TaskOutcome> {
        self.inner.listeners.notify_rollback_started(task, context)?;
        log::info!(
            "Rolling back task '{}' (level {}) on system '{}'",
            task.name(),
            task.level(),
            context.system_name()
        );
        match task.rollback(context) {
            Ok(()) => {
                self.inner
                    .listeners
                    .notify_rollback_successful(task, context)?;
                context.commit()?;
                Ok(TaskOutcome {
                    task_name: task.name(),
                    level: task.level(),
                })
            }
            Err(error) => {
                self.inner
                    .listeners
                    .notify_rollback_failed(task, context, &error);
                log::error!(
                    "Rollback of task '{}' failed on system '{}': {}",
                    task.name(),
                    context.system_name(),
                    error.message()
                );
                if let Err(rollback_error) = context.rollback() {
                    log::error!(
                        "Context rollback after failed rollback of '{}' also failed: {}",
                        task.name(),
                        rollback_error.message()
                    );
                }
                Err(PatchError::new_with_cause(
                    &format!("Rollback of task '{}' failed", task.name()),
                    ErrorKind::RollbackError,
                    error,
                ))
            }
        }
    }
}
