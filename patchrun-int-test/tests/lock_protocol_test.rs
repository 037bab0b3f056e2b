use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use patchrun::{
    InMemoryPatchInfoStore, MigrationConfig, MigrationLauncher, PatchInfoStore,
};
use patchrun_int_test::test_util::{RecordingContext, StaticTaskSource};

fn contended_launcher(
    store: PatchInfoStore,
    journal: Arc<Mutex<Vec<String>>>,
    config: MigrationConfig,
) -> MigrationLauncher {
    let config = config.with_patch_location("static");
    let launcher = MigrationLauncher::new(config).expect("launcher");
    launcher.add_task_source(StaticTaskSource::new(vec![1], journal));
    launcher.add_context_with_store(
        RecordingContext::new("orders", "postgres").into_context(),
        store,
    );
    launcher
}

#[test]
fn test_run_waits_for_competing_instance_to_release() {
    let provider = InMemoryPatchInfoStore::new("orders");
    let store = PatchInfoStore::new(provider.clone());
    store.create_if_needed().expect("create");
    store.lock().expect("competitor takes the lock first");

    // a competing instance finishes after a few polls
    let competitor_store = PatchInfoStore::new(provider);
    let competitor = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        competitor_store.unlock().expect("competitor releases");
    });

    let journal = Arc::new(Mutex::new(Vec::new()));
    let launcher = contended_launcher(
        store.clone(),
        journal.clone(),
        MigrationConfig::new().with_lock_poll_millis(5),
    );

    let applied = launcher.do_migrations().expect("run after wait");
    competitor.join().expect("competitor thread");

    assert_eq!(applied, 1);
    assert_eq!(journal.lock().len(), 1);
    assert!(!store.is_locked().expect("released after run"));
}

#[test]
fn test_orphaned_lock_is_overridden_after_retry_budget() {
    let store = PatchInfoStore::new(InMemoryPatchInfoStore::new("orders"));
    store.create_if_needed().expect("create");
    store.lock().expect("orphaned lock from a crashed run");

    let journal = Arc::new(Mutex::new(Vec::new()));
    let launcher = contended_launcher(
        store.clone(),
        journal.clone(),
        MigrationConfig::new()
            .with_lock_poll_millis(1)
            .with_lock_poll_retries(3),
    );

    // nobody ever releases; the budget expires and the run proceeds anyway
    let applied = launcher.do_migrations().expect("run after override");
    assert_eq!(applied, 1);
    assert!(!store.is_locked().expect("released after run"));
}

#[test]
fn test_two_instances_never_run_concurrently() {
    let provider = InMemoryPatchInfoStore::new("orders");
    let journal = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let store = PatchInfoStore::new(provider.clone());
        let journal = journal.clone();
        handles.push(thread::spawn(move || {
            let launcher = contended_launcher(
                store,
                journal,
                MigrationConfig::new().with_lock_poll_millis(2),
            );
            launcher.do_migrations().expect("run")
        }));
    }

    let total: usize = handles
        .into_iter()
        .map(|handle| handle.join().expect("instance thread"))
        .sum();

    // both instances complete; the second finds nothing left to do
    assert_eq!(total, 1);
    assert_eq!(journal.lock().len(), 1);
}
