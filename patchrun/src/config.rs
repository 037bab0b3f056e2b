//! Engine and launcher configuration.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor};

/// Default wait between lock polls, in milliseconds.
pub const DEFAULT_LOCK_POLL_MILLIS: u64 = 15_000;
/// Default lock-poll retry budget; −1 means poll forever.
pub const DEFAULT_LOCK_POLL_RETRIES: i64 = -1;

/// Configuration shared by engines and launchers.
///
/// Handles are cheap to clone and share state, so a launcher and the engine
/// it builds always agree. Values not set keep their defaults: the ordered
/// strategy, read-write mode, a 15-second lock poll with an unlimited retry
/// budget, and no patch locations.
///
/// # Examples
///
/// ```rust,ignore
/// use patchrun::MigrationConfig;
///
/// let config = MigrationConfig::new()
///     .with_patch_location("sql/patches")
///     .with_post_patch_location("sql/post-patch")
///     .with_strategy_name("missing-patch")
///     .with_lock_poll_millis(2_000);
/// ```
#[derive(Clone)]
pub struct MigrationConfig {
    inner: Arc<MigrationConfigInner>,
}

struct MigrationConfigInner {
    strategy_name: Atomic<String>,
    read_only: AtomicBool,
    force_sync: AtomicBool,
    lock_poll_millis: AtomicU64,
    lock_poll_retries: AtomicI64,
    patch_locations: Atomic<Vec<String>>,
    post_patch_locations: Atomic<Vec<String>>,
}

impl MigrationConfig {
    pub fn new() -> Self {
        MigrationConfig {
            inner: Arc::new(MigrationConfigInner {
                strategy_name: atomic(String::new()),
                read_only: AtomicBool::new(false),
                force_sync: AtomicBool::new(false),
                lock_poll_millis: AtomicU64::new(DEFAULT_LOCK_POLL_MILLIS),
                lock_poll_retries: AtomicI64::new(DEFAULT_LOCK_POLL_RETRIES),
                patch_locations: atomic(Vec::new()),
                post_patch_locations: atomic(Vec::new()),
            }),
        }
    }

    /// The configured strategy name; blank selects the ordered strategy.
    pub fn strategy_name(&self) -> String {
        self.inner.strategy_name.read_with(|name| name.clone())
    }

    pub fn set_strategy_name(&self, name: &str) {
        self.inner
            .strategy_name
            .write_with(|current| *current = name.to_string());
    }

    pub fn with_strategy_name(self, name: &str) -> Self {
        self.set_strategy_name(name);
        self
    }

    /// Read-only mode reports outstanding work without applying it.
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only.load(Ordering::Relaxed)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.inner.read_only.store(read_only, Ordering::Relaxed);
    }

    pub fn with_read_only(self, read_only: bool) -> Self {
        self.set_read_only(read_only);
        self
    }

    /// Force-sync lets out-of-sync controlled systems catch up silently
    /// instead of aborting a distributed run.
    pub fn is_force_sync(&self) -> bool {
        self.inner.force_sync.load(Ordering::Relaxed)
    }

    pub fn set_force_sync(&self, force_sync: bool) {
        self.inner.force_sync.store(force_sync, Ordering::Relaxed);
    }

    pub fn with_force_sync(self, force_sync: bool) -> Self {
        self.set_force_sync(force_sync);
        self
    }

    pub fn lock_poll_millis(&self) -> u64 {
        self.inner.lock_poll_millis.load(Ordering::Relaxed)
    }

    pub fn set_lock_poll_millis(&self, millis: u64) {
        self.inner.lock_poll_millis.store(millis, Ordering::Relaxed);
    }

    pub fn with_lock_poll_millis(self, millis: u64) -> Self {
        self.set_lock_poll_millis(millis);
        self
    }

    /// How many times to poll a held lock before forcing it open; −1 polls
    /// forever.
    pub fn lock_poll_retries(&self) -> i64 {
        self.inner.lock_poll_retries.load(Ordering::Relaxed)
    }

    pub fn set_lock_poll_retries(&self, retries: i64) {
        self.inner.lock_poll_retries.store(retries, Ordering::Relaxed);
    }

    pub fn with_lock_poll_retries(self, retries: i64) -> Self {
        self.set_lock_poll_retries(retries);
        self
    }

    pub fn patch_locations(&self) -> Vec<String> {
        self.inner.patch_locations.read_with(|locations| locations.clone())
    }

    pub fn add_patch_location(&self, location: &str) {
        self.inner
            .patch_locations
            .write_with(|locations| locations.push(location.to_string()));
    }

    pub fn with_patch_location(self, location: &str) -> Self {
        self.add_patch_location(location);
        self
    }

    pub fn post_patch_locations(&self) -> Vec<String> {
        self.inner
            .post_patch_locations
            .read_with(|locations| locations.clone())
    }

    pub fn add_post_patch_location(&self, location: &str) {
        self.inner
            .post_patch_locations
            .write_with(|locations| locations.push(location.to_string()));
    }

    pub fn with_post_patch_location(self, location: &str) -> Self {
        self.add_post_patch_location(location);
        self
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::new()
    }
}
