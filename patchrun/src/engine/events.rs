use std::sync::Arc;

use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use crate::context::MigrationContext;
use crate::errors::{PatchError, PatchResult};
use crate::task::MigrationTask;

/// Observes forward migration runs.
///
/// Listeners are notified in registration order. They observe; they do not
/// persist — the engine records the new patch level itself from the
/// [`TaskOutcome`] the apply primitive returns.
pub trait MigrationListener: Send + Sync {
    fn migration_started(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
    ) -> PatchResult<()>;

    fn migration_successful(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
    ) -> PatchResult<()>;

    fn migration_failed(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
        error: &PatchError,
    ) -> PatchResult<()>;
}

/// Observes rollback runs. See [`MigrationListener`] for the notification
/// contract.
pub trait RollbackListener: Send + Sync {
    fn rollback_started(&self, task: &MigrationTask, context: &MigrationContext)
        -> PatchResult<()>;

    fn rollback_successful(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
    ) -> PatchResult<()>;

    fn rollback_failed(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
        error: &PatchError,
    ) -> PatchResult<()>;
}

/// Structured result of one applied or rolled-back task, returned by the
/// apply primitive for the caller to persist explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_name: String,
    pub level: i32,
}

/// Holds registered listeners and broadcasts to them in registration order.
///
/// Errors from `started`/`successful` callbacks propagate and abort the run;
/// errors from `failed` callbacks are logged only, so they can never mask
/// the task error being reported.
#[derive(Clone)]
pub(crate) struct ListenerRegistry {
    migration_listeners: Atomic<Vec<Arc<dyn MigrationListener>>>,
    rollback_listeners: Atomic<Vec<Arc<dyn RollbackListener>>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        ListenerRegistry {
            migration_listeners: atomic(Vec::new()),
            rollback_listeners: atomic(Vec::new()),
        }
    }

    pub(crate) fn add_migration_listener(&self, listener: Arc<dyn MigrationListener>) {
        self.migration_listeners
            .write_with(|listeners| listeners.push(listener));
    }

    pub(crate) fn add_rollback_listener(&self, listener: Arc<dyn RollbackListener>) {
        self.rollback_listeners
            .write_with(|listeners| listeners.push(listener));
    }

    fn migration_listeners(&self) -> Vec<Arc<dyn MigrationListener>> {
        self.migration_listeners.read_with(|listeners| listeners.clone())
    }

    fn rollback_listeners(&self) -> Vec<Arc<dyn RollbackListener>> {
        self.rollback_listeners.read_with(|listeners| listeners.clone())
    }

    pub(crate) fn notify_migration_started(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
    ) -> PatchResult<()> {
        for listener in self.migration_listeners() {
            listener.migration_started(task, context)?;
        }
        Ok(())
    }

    pub(crate) fn notify_migration_successful(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
    ) -> PatchResult<()> {
        for listener in self.migration_listeners() {
            listener.migration_successful(task, context)?;
        }
        Ok(())
    }

    pub(crate) fn notify_migration_failed(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
        error: &PatchError,
    ) {
        for listener in self.migration_listeners() {
            if let Err(listener_error) = listener.migration_failed(task, context, error) {
                log::warn!(
                    "Migration listener failed while handling task failure: {}",
                    listener_error.message()
                );
            }
        }
    }

    pub(crate) fn notify_rollback_started(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
    ) -> PatchResult<()> {
        for listener in self.rollback_listeners() {
            listener.rollback_started(task, context)?;
        }
        Ok(())
    }

    pub(crate) fn notify_rollback_successful(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
    ) -> PatchResult<()> {
        for listener in self.rollback_listeners() {
            listener.rollback_successful(task, context)?;
        }
        Ok(())
    }

    pub(crate) fn notify_rollback_failed(
        &self,
        task: &MigrationTask,
        context: &MigrationContext,
        error: &PatchError,
    ) {
        for listener in self.rollback_listeners() {
            if let Err(listener_error) = listener.rollback_failed(task, context, error) {
                log::warn!(
                    "Rollback listener failed while handling task failure: {}",
                    listener_error.message()
                );
            }
        }
    }
}
