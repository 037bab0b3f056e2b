//! Per-system façades owning (context, store) pairs, the lock-wait/override
//! loop, and the transaction boundaries around engine calls.

mod distributed_launcher;
mod migration_launcher;

use std::thread;
use std::time::Duration;

use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::errors::{ErrorKind, PatchResult};
use crate::store::PatchInfoStore;

pub use distributed_launcher::DistributedMigrationLauncher;
pub use migration_launcher::MigrationLauncher;

/// Runs `operation` while holding the store's patch lock, inside a
/// transaction boundary on the context.
///
/// The protocol, in order:
///
/// 1. Poll `is_locked()`; while held, sleep `lock_poll_millis` and re-poll.
///    When the `lock_poll_retries` budget (−1 = infinite) runs out, force
///    `unlock()` with a warning and proceed — this recovers orphaned locks
///    from a crashed prior run.
/// 2. Attempt `lock()`. The unlocked observation and the attempt are not
///    atomic, so a racing process can win in between; the distinguished
///    `AlreadyLocked` failure sends us back to step 1, never up the stack.
/// 3. With the lock held, capture the context's auto-commit mode, disable
///    it, and run the operation. Auto-commit is restored and the lock is
///    released on every exit path, so a retry is always possible.
pub(crate) fn with_patch_lock<T>(
    config: &MigrationConfig,
    store: &PatchInfoStore,
    context: &MigrationContext,
    operation: impl FnOnce() -> PatchResult<T>,
) -> PatchResult<T> {
    store.create_if_needed()?;
    wait_for_and_obtain_lock(config, store)?;

    let captured_auto_commit = match context.is_auto_commit() {
        Ok(mode) => Some(mode),
        Err(error) => {
            log::warn!(
                "Could not read auto-commit mode for system '{}': {}",
                context.system_name(),
                error.message()
            );
            None
        }
    };
    if let Err(error) = context.set_auto_commit(false) {
        release_lock(store);
        return Err(error);
    }

    let result = operation();

    if let Some(mode) = captured_auto_commit {
        if let Err(error) = context.set_auto_commit(mode) {
            log::warn!(
                "Could not restore auto-commit mode for system '{}': {}",
                context.system_name(),
                error.message()
            );
        }
    }
    release_lock(store);
    result
}

fn release_lock(store: &PatchInfoStore) {
    if let Err(error) = store.unlock() {
        // the operation's own result must not be masked by cleanup
        log::error!(
            "Could not release the patch lock for system '{}': {}",
            store.system_name(),
            error.message()
        );
    }
}

fn wait_for_and_obtain_lock(config: &MigrationConfig, store: &PatchInfoStore) -> PatchResult<()> {
    loop {
        wait_for_unlock(config, store)?;
        match store.lock() {
            Ok(()) => return Ok(()),
            Err(error) if *error.kind() == ErrorKind::AlreadyLocked => {
                log::debug!(
                    "Lost the patch lock race for system '{}'; waiting again",
                    store.system_name()
                );
            }
            Err(error) => return Err(error),
        }
    }
}

fn wait_for_unlock(config: &MigrationConfig, store: &PatchInfoStore) -> PatchResult<()> {
    let poll_millis = config.lock_poll_millis();
    let retry_budget = config.lock_poll_retries();
    let mut polls: i64 = 0;

    while store.is_locked()? {
        polls += 1;
        if retry_budget >= 0 && polls > retry_budget {
            log::warn!(
                "Patch lock for system '{}' still held after {} poll(s); assuming it was \
                 orphaned by a crashed run and forcing it open",
                store.system_name(),
                polls - 1
            );
            store.unlock()?;
            return Ok(());
        }
        log::info!(
            "Waiting {} ms for the patch lock on system '{}'",
            poll_millis,
            store.system_name()
        );
        thread::sleep(Duration::from_millis(poll_millis));
    }
    Ok(())
}
