use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::errors::{ErrorKind, PatchError, PatchResult};
use crate::store::PatchInfoStoreProvider;

/// In-memory patch-info store.
///
/// Complete implementation of the store contract with no database behind it.
/// Suitable for tests, dry runs, and embedders whose patch bookkeeping lives
/// outside the patched database. Clones share state, so one instance can be
/// handed to several launchers to simulate contention.
#[derive(Clone)]
pub struct InMemoryPatchInfoStore {
    inner: Arc<InMemoryStoreInner>,
}

struct InMemoryStoreInner {
    system_name: String,
    state: Mutex<Option<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    patch_level: i32,
    applied_patches: BTreeSet<i32>,
    locked: bool,
}

impl InMemoryPatchInfoStore {
    pub fn new(system_name: &str) -> Self {
        InMemoryPatchInfoStore {
            inner: Arc::new(InMemoryStoreInner {
                system_name: system_name.to_string(),
                state: Mutex::new(None),
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> PatchResult<R> {
        let mut guard = self.inner.state.lock();
        match guard.as_mut() {
            Some(state) => Ok(f(state)),
            None => Err(PatchError::new(
                &format!(
                    "Patch info for system '{}' has not been created",
                    self.inner.system_name
                ),
                ErrorKind::StoreError,
            )),
        }
    }
}

impl PatchInfoStoreProvider for InMemoryPatchInfoStore {
    fn system_name(&self) -> String {
        self.inner.system_name.clone()
    }

    fn create_if_needed(&self) -> PatchResult<()> {
        let mut guard = self.inner.state.lock();
        if guard.is_none() {
            log::debug!(
                "Seeding patch info for new system '{}' at level 0",
                self.inner.system_name
            );
            *guard = Some(StoreState::default());
        }
        Ok(())
    }

    fn patch_level(&self) -> PatchResult<i32> {
        self.with_state(|state| state.patch_level)
    }

    fn update_patch_level(&self, level: i32) -> PatchResult<()> {
        self.with_state(|state| {
            state.patch_level = level;
            state.applied_patches.insert(level);
        })
    }

    fn update_patch_level_after_rollback(&self, level: i32) -> PatchResult<()> {
        self.with_state(|state| {
            state.applied_patches.remove(&level);
            state.patch_level = state.applied_patches.iter().next_back().copied().unwrap_or(0);
        })
    }

    fn is_locked(&self) -> PatchResult<bool> {
        self.with_state(|state| state.locked)
    }

    fn lock(&self) -> PatchResult<()> {
        self.with_state(|state| {
            if state.locked {
                Err(PatchError::new(
                    &format!(
                        "Patch lock for system '{}' is held by another invocation",
                        self.inner.system_name
                    ),
                    ErrorKind::AlreadyLocked,
                ))
            } else {
                state.locked = true;
                Ok(())
            }
        })?
    }

    fn unlock(&self) -> PatchResult<()> {
        self.with_state(|state| state.locked = false)
    }

    fn is_patch_applied(&self, level: i32) -> PatchResult<bool> {
        self.with_state(|state| state.applied_patches.contains(&level))
    }

    fn patches_applied(&self) -> PatchResult<BTreeSet<i32>> {
        self.with_state(|state| state.applied_patches.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PatchInfoStore;

    fn fresh_store() -> PatchInfoStore {
        let store = PatchInfoStore::new(InMemoryPatchInfoStore::new("orders"));
        store.create_if_needed().unwrap();
        store
    }

    #[test]
    fn test_create_if_needed_seeds_level_zero() {
        let store = fresh_store();
        assert_eq!(store.patch_level().unwrap(), 0);
        assert!(store.patches_applied().unwrap().is_empty());
        assert!(!store.is_locked().unwrap());
    }

    #[test]
    fn test_create_if_needed_is_idempotent() {
        let store = fresh_store();
        store.update_patch_level(3).unwrap();
        store.create_if_needed().unwrap();
        assert_eq!(store.patch_level().unwrap(), 3);
    }

    #[test]
    fn test_access_before_create_is_store_error() {
        let store = PatchInfoStore::new(InMemoryPatchInfoStore::new("orders"));
        let err = store.patch_level().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::StoreError);
    }

    #[test]
    fn test_update_patch_level_records_applied_set() {
        let store = fresh_store();
        store.update_patch_level(1).unwrap();
        store.update_patch_level(2).unwrap();
        assert_eq!(store.patch_level().unwrap(), 2);
        assert!(store.is_patch_applied(1).unwrap());
        assert!(store.is_patch_applied(2).unwrap());
        assert!(!store.is_patch_applied(3).unwrap());
    }

    #[test]
    fn test_rollback_recomputes_level_from_applied_set() {
        let store = fresh_store();
        for level in 1..=5 {
            store.update_patch_level(level).unwrap();
        }
        store.update_patch_level_after_rollback(5).unwrap();
        assert_eq!(store.patch_level().unwrap(), 4);

        // removing a mid-set level keeps the high-water mark
        store.update_patch_level_after_rollback(2).unwrap();
        assert_eq!(store.patch_level().unwrap(), 4);
        assert!(!store.is_patch_applied(2).unwrap());
    }

    #[test]
    fn test_rollback_of_last_patch_returns_to_zero() {
        let store = fresh_store();
        store.update_patch_level(1).unwrap();
        store.update_patch_level_after_rollback(1).unwrap();
        assert_eq!(store.patch_level().unwrap(), 0);
    }

    #[test]
    fn test_lock_fails_with_already_locked_when_held() {
        let store = fresh_store();
        store.lock().unwrap();
        assert!(store.is_locked().unwrap());

        let err = store.lock().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::AlreadyLocked);

        store.unlock().unwrap();
        store.lock().unwrap();
    }

    #[test]
    fn test_clones_share_state() {
        let provider = InMemoryPatchInfoStore::new("orders");
        let a = PatchInfoStore::new(provider.clone());
        let b = PatchInfoStore::new(provider);
        a.create_if_needed().unwrap();
        a.update_patch_level(7).unwrap();
        assert_eq!(b.patch_level().unwrap(), 7);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let store = fresh_store();
        store.update_patch_level(1).unwrap();
        store.update_patch_level(4).unwrap();
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.patch_level, 4);
        assert_eq!(snapshot.applied_patches.len(), 2);
    }
}
