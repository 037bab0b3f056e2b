//! Patch-level persistence.
//!
//! A [`PatchInfoStore`] remembers, per system, the patch level high-water
//! mark, the set of applied patch levels, and the database-resident lock flag
//! that coordinates concurrent patch runs across application instances.

mod memory;
mod sql_store;

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use crate::errors::PatchResult;

pub use memory::InMemoryPatchInfoStore;
pub use sql_store::SqlPatchInfoStore;

/// Contract every patch-info store implementation must follow.
///
/// The level and applied-set change only through [`update_patch_level`] and
/// [`update_patch_level_after_rollback`]; the lock flag only through
/// [`lock`] and [`unlock`]. Implementations must make every mutation visible
/// to other instances as soon as the call returns, because the lock protocol
/// relies on it.
///
/// [`update_patch_level`]: PatchInfoStoreProvider::update_patch_level
/// [`update_patch_level_after_rollback`]: PatchInfoStoreProvider::update_patch_level_after_rollback
/// [`lock`]: PatchInfoStoreProvider::lock
/// [`unlock`]: PatchInfoStoreProvider::unlock
pub trait PatchInfoStoreProvider: Send + Sync {
    /// The system this store tracks.
    fn system_name(&self) -> String;

    /// Creates the backing storage and seeds level 0 for a new system.
    /// Idempotent; calling it on an existing system changes nothing.
    fn create_if_needed(&self) -> PatchResult<()>;

    /// Current patch level high-water mark (0 for a new system).
    fn patch_level(&self) -> PatchResult<i32>;

    /// Records a successfully applied patch: sets the level and adds it to
    /// the applied set.
    fn update_patch_level(&self, level: i32) -> PatchResult<()>;

    /// Records a rolled-back patch: removes `level` from the applied set and
    /// recomputes the high-water mark from what remains.
    fn update_patch_level_after_rollback(&self, level: i32) -> PatchResult<()>;

    fn is_locked(&self) -> PatchResult<bool>;

    /// Obtains the patch lock.
    ///
    /// # Errors
    ///
    /// Fails with `ErrorKind::AlreadyLocked` when another invocation holds
    /// the lock; callers treat that as contention, never as fatal.
    fn lock(&self) -> PatchResult<()>;

    fn unlock(&self) -> PatchResult<()>;

    fn is_patch_applied(&self, level: i32) -> PatchResult<bool>;

    fn patches_applied(&self) -> PatchResult<BTreeSet<i32>>;
}

/// Cloneable handle to a patch-info store.
#[derive(Clone)]
pub struct PatchInfoStore {
    inner: Arc<dyn PatchInfoStoreProvider>,
}

impl PatchInfoStore {
    pub fn new<P: PatchInfoStoreProvider + 'static>(provider: P) -> Self {
        PatchInfoStore {
            inner: Arc::new(provider),
        }
    }

    pub fn system_name(&self) -> String {
        self.inner.system_name()
    }

    pub fn create_if_needed(&self) -> PatchResult<()> {
        self.inner.create_if_needed()
    }

    pub fn patch_level(&self) -> PatchResult<i32> {
        self.inner.patch_level()
    }

    pub fn update_patch_level(&self, level: i32) -> PatchResult<()> {
        self.inner.update_patch_level(level)
    }

    pub fn update_patch_level_after_rollback(&self, level: i32) -> PatchResult<()> {
        self.inner.update_patch_level_after_rollback(level)
    }

    pub fn is_locked(&self) -> PatchResult<bool> {
        self.inner.is_locked()
    }

    pub fn lock(&self) -> PatchResult<()> {
        self.inner.lock()
    }

    pub fn unlock(&self) -> PatchResult<()> {
        self.inner.unlock()
    }

    pub fn is_patch_applied(&self, level: i32) -> PatchResult<bool> {
        self.inner.is_patch_applied(level)
    }

    pub fn patches_applied(&self) -> PatchResult<BTreeSet<i32>> {
        self.inner.patches_applied()
    }

    /// Reads an immutable level/applied-set view for strategy decisions and
    /// distributed sync checks.
    pub fn snapshot(&self) -> PatchResult<StoreSnapshot> {
        Ok(StoreSnapshot {
            patch_level: self.patch_level()?,
            applied_patches: self.patches_applied()?,
        })
    }
}

impl Debug for PatchInfoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatchInfoStore({})", self.system_name())
    }
}

/// An immutable view of one store's level and applied set.
///
/// Run strategies and the distributed engine consume snapshots only; they
/// never mutate stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub patch_level: i32,
    pub applied_patches: BTreeSet<i32>,
}

impl StoreSnapshot {
    pub fn new(patch_level: i32, applied_patches: impl IntoIterator<Item = i32>) -> Self {
        StoreSnapshot {
            patch_level,
            applied_patches: applied_patches.into_iter().collect(),
        }
    }
}
