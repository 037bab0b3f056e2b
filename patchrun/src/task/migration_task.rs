use std::fmt::Debug;
use std::sync::Arc;

use crate::context::MigrationContext;
use crate::errors::{ErrorKind, PatchError, PatchResult};

/// Contract for one atomic, levelled schema-change unit.
///
/// Identity is `name` (descriptive) plus `level` (globally unique within a
/// discovered set; drives ordering and patch-level bookkeeping). The up
/// action is mandatory; a task supports rollback iff it carries a down
/// action.
pub trait MigrationTaskProvider: Send + Sync {
    fn name(&self) -> String;

    fn level(&self) -> i32;

    /// The up action: bring the schema from `level - 1` to `level`.
    fn up(&self, context: &MigrationContext) -> PatchResult<()>;

    /// The down action. The default raises `RollbackError`; implementers
    /// with a real down action must also override [`supports_rollback`].
    ///
    /// [`supports_rollback`]: MigrationTaskProvider::supports_rollback
    fn down(&self, _context: &MigrationContext) -> PatchResult<()> {
        Err(PatchError::new(
            &format!("Task '{}' does not support rollback", self.name()),
            ErrorKind::RollbackError,
        ))
    }

    fn supports_rollback(&self) -> bool {
        false
    }
}

/// Cloneable handle to a migration task.
#[derive(Clone)]
pub struct MigrationTask {
    inner: Arc<dyn MigrationTaskProvider>,
}

impl MigrationTask {
    pub fn new<P: MigrationTaskProvider + 'static>(provider: P) -> Self {
        MigrationTask {
            inner: Arc::new(provider),
        }
    }

    pub fn name(&self) -> String {
        self.inner.name()
    }

    pub fn level(&self) -> i32 {
        self.inner.level()
    }

    /// Runs the task's up action against the given context.
    pub fn migrate(&self, context: &MigrationContext) -> PatchResult<()> {
        self.inner.up(context)
    }

    /// Runs the task's down action against the given context.
    pub fn rollback(&self, context: &MigrationContext) -> PatchResult<()> {
        self.inner.down(context)
    }

    pub fn supports_rollback(&self) -> bool {
        self.inner.supports_rollback()
    }
}

impl Debug for MigrationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MigrationTask({}, level {})", self.name(), self.level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTask;

    impl MigrationTaskProvider for NoopTask {
        fn name(&self) -> String {
            "noop".to_string()
        }

        fn level(&self) -> i32 {
            1
        }

        fn up(&self, _context: &MigrationContext) -> PatchResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_rollback_is_unsupported() {
        let task = MigrationTask::new(NoopTask);
        assert!(!task.supports_rollback());
    }

    #[test]
    fn test_debug_shows_name_and_level() {
        let task = MigrationTask::new(NoopTask);
        assert_eq!(format!("{:?}", task), "MigrationTask(noop, level 1)");
    }
}
