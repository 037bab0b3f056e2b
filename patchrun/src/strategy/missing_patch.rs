use crate::errors::PatchResult;
use crate::store::StoreSnapshot;
use crate::strategy::{RunStrategy, MISSING_PATCH_STRATEGY};
use crate::task::MigrationTask;

/// Strategy for patch streams that may back-fill: a task runs iff its level
/// has never been applied, regardless of the high-water mark.
///
/// Two systems are in sync iff their applied sets are equal. A rollback takes
/// an arbitrary list of target levels and unwinds exactly those that are
/// currently applied, highest first.
#[derive(Debug)]
pub struct MissingPatchStrategy;

impl RunStrategy for MissingPatchStrategy {
    fn name(&self) -> &'static str {
        MISSING_PATCH_STRATEGY
    }

    fn should_run(&self, task_level: i32, snapshot: &StoreSnapshot) -> bool {
        !snapshot.applied_patches.contains(&task_level)
    }

    fn is_sync(&self, a: &StoreSnapshot, b: &StoreSnapshot) -> bool {
        a.applied_patches == b.applied_patches
    }

    fn rollback_candidates(
        &self,
        tasks: &[MigrationTask],
        targets: &[i32],
        snapshot: &StoreSnapshot,
    ) -> PatchResult<Vec<MigrationTask>> {
        let mut candidates: Vec<MigrationTask> = tasks
            .iter()
            .filter(|task| {
                targets.contains(&task.level())
                    && snapshot.applied_patches.contains(&task.level())
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|task| std::cmp::Reverse(task.level()));
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MigrationContext;
    use crate::task::MigrationTaskProvider;

    struct StubTask(i32);

    impl MigrationTaskProvider for StubTask {
        fn name(&self) -> String {
            format!("patch{}", self.0)
        }

        fn level(&self) -> i32 {
            self.0
        }

        fn up(&self, _context: &MigrationContext) -> PatchResult<()> {
            Ok(())
        }
    }

    fn tasks(levels: &[i32]) -> Vec<MigrationTask> {
        levels.iter().map(|l| MigrationTask::new(StubTask(*l))).collect()
    }

    #[test]
    fn test_should_run_skips_applied_levels_only() {
        let strategy = MissingPatchStrategy;
        let snap = StoreSnapshot::new(5, [1, 2, 5]);
        // a hole below the high-water mark still runs
        assert!(strategy.should_run(3, &snap));
        assert!(strategy.should_run(4, &snap));
        assert!(!strategy.should_run(5, &snap));
        assert!(strategy.should_run(6, &snap));
    }

    #[test]
    fn test_is_sync_compares_applied_sets() {
        let strategy = MissingPatchStrategy;
        let a = StoreSnapshot::new(5, [1, 2, 5]);
        let b = StoreSnapshot::new(3, [1, 2, 5]);
        let c = StoreSnapshot::new(5, [1, 2, 3]);
        // same set, different high-water mark: still in sync
        assert!(strategy.is_sync(&a, &b));
        assert!(!strategy.is_sync(&a, &c));
    }

    #[test]
    fn test_rollback_candidates_applied_targets_descending() {
        let strategy = MissingPatchStrategy;
        let snap = StoreSnapshot::new(5, [1, 3, 5]);
        let candidates = strategy
            .rollback_candidates(&tasks(&[1, 2, 3, 4, 5]), &[1, 4, 5], &snap)
            .unwrap();
        let levels: Vec<i32> = candidates.iter().map(|t| t.level()).collect();
        // 4 is not applied, so only 5 and 1 qualify
        assert_eq!(levels, vec![5, 1]);
    }

    #[test]
    fn test_rollback_with_no_applied_targets_is_empty() {
        let strategy = MissingPatchStrategy;
        let snap = StoreSnapshot::new(2, [1, 2]);
        let candidates = strategy
            .rollback_candidates(&tasks(&[1, 2, 3]), &[3], &snap)
            .unwrap();
        assert!(candidates.is_empty());
    }
}
