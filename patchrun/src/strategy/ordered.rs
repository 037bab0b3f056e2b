use crate::errors::{ErrorKind, PatchError, PatchResult};
use crate::store::StoreSnapshot;
use crate::strategy::{RunStrategy, ORDERED_STRATEGY};
use crate::task::MigrationTask;

/// The default strategy: patch levels form a strictly ascending sequence and
/// the store's level is a high-water mark.
///
/// A task runs iff its level is above the stored level; two systems are in
/// sync iff their levels are equal; a rollback takes exactly one target level
/// and unwinds every task above it, highest first.
#[derive(Debug)]
pub struct OrderedStrategy;

impl RunStrategy for OrderedStrategy {
    fn name(&self) -> &'static str {
        ORDERED_STRATEGY
    }

    fn should_run(&self, task_level: i32, snapshot: &StoreSnapshot) -> bool {
        task_level > snapshot.patch_level
    }

    fn is_sync(&self, a: &StoreSnapshot, b: &StoreSnapshot) -> bool {
        a.patch_level == b.patch_level
    }

    fn rollback_candidates(
        &self,
        tasks: &[MigrationTask],
        targets: &[i32],
        snapshot: &StoreSnapshot,
    ) -> PatchResult<Vec<MigrationTask>> {
        if targets.len() != 1 {
            return Err(PatchError::new(
                &format!(
                    "The ordered strategy rolls back to exactly one target level; {} were given",
                    targets.len()
                ),
                ErrorKind::ValidationError,
            ));
        }
        let target = targets[0];
        let current = snapshot.patch_level;
        if target > current {
            return Err(PatchError::new(
                &format!(
                    "Rollback target level {} is above the current patch level {}",
                    target, current
                ),
                ErrorKind::RollbackError,
            ));
        }

        let mut candidates: Vec<MigrationTask> = tasks
            .iter()
            .filter(|task| task.level() > target && task.level() <= current)
            .cloned()
            .collect();
        candidates.sort_by_key(|task| std::cmp::Reverse(task.level()));
        Ok(candidates)
    }
}
