//! Shared fixtures for the integration tests: a recording context, a
//! scratch directory for patch scripts, and programmatic tasks.

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};

use patchrun::{
    DatabaseType, MigrationContext, MigrationContextProvider, MigrationTask,
    MigrationTaskProvider, PatchError, PatchResult, TaskSource,
};

static INIT_LOGGING: Once = Once::new();
static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

#[ctor::ctor]
fn init_logging() {
    INIT_LOGGING.call_once(colog::init);
}

/// A unique scratch path under the system temp directory.
pub fn random_path(tag: &str) -> PathBuf {
    let unique = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "patchrun-int-{}-{}-{}",
        tag,
        std::process::id(),
        unique
    ))
}

/// A scratch directory of patch scripts, removed on drop.
pub struct ScriptDir {
    path: PathBuf,
}

impl ScriptDir {
    pub fn new(tag: &str) -> Self {
        let path = random_path(tag);
        fs::create_dir_all(&path).expect("Failed to create script directory");
        ScriptDir { path }
    }

    pub fn write(&self, name: &str, contents: &str) -> &Self {
        fs::write(self.path.join(name), contents).expect("Failed to write patch script");
        self
    }

    pub fn location(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScriptDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[derive(Default)]
struct RecordedState {
    executed: Vec<String>,
    commits: usize,
    rollbacks: usize,
    auto_commit: bool,
    fail_on: Option<String>,
}

/// A context that records every statement, commit, and rollback, and can be
/// told to fail when a statement contains a marker substring.
#[derive(Clone)]
pub struct RecordingContext {
    system_name: String,
    database_type: DatabaseType,
    state: Arc<Mutex<RecordedState>>,
}

impl RecordingContext {
    pub fn new(system_name: &str, dialect: &str) -> Self {
        RecordingContext {
            system_name: system_name.to_string(),
            database_type: DatabaseType::new(dialect).expect("Known dialect"),
            state: Arc::new(Mutex::new(RecordedState {
                auto_commit: true,
                ..RecordedState::default()
            })),
        }
    }

    /// Makes `execute` fail for any statement containing the marker.
    pub fn fail_on(&self, marker: &str) {
        self.state.lock().fail_on = Some(marker.to_string());
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }

    pub fn into_context(self) -> MigrationContext {
        MigrationContext::new(self)
    }
}

impl MigrationContextProvider for RecordingContext {
    fn system_name(&self) -> String {
        self.system_name.clone()
    }

    fn database_type(&self) -> DatabaseType {
        self.database_type.clone()
    }

    fn execute(&self, sql: &str) -> PatchResult<u64> {
        let mut state = self.state.lock();
        if let Some(marker) = &state.fail_on {
            if sql.contains(marker.as_str()) {
                return Err(PatchError::new(
                    &format!("Injected failure on statement: {}", sql),
                    patchrun::ErrorKind::TaskError,
                ));
            }
        }
        state.executed.push(sql.to_string());
        Ok(1)
    }

    fn query_int(&self, _sql: &str) -> PatchResult<Option<i64>> {
        Ok(None)
    }

    fn query_int_list(&self, _sql: &str) -> PatchResult<Vec<i64>> {
        Ok(Vec::new())
    }

    fn commit(&self) -> PatchResult<()> {
        self.state.lock().commits += 1;
        Ok(())
    }

    fn rollback(&self) -> PatchResult<()> {
        self.state.lock().rollbacks += 1;
        Ok(())
    }

    fn is_auto_commit(&self) -> PatchResult<bool> {
        Ok(self.state.lock().auto_commit)
    }

    fn set_auto_commit(&self, auto_commit: bool) -> PatchResult<()> {
        self.state.lock().auto_commit = auto_commit;
        Ok(())
    }
}

/// A programmatic task that appends to a shared journal.
pub struct JournalTask {
    name: String,
    level: i32,
    journal: Arc<Mutex<Vec<String>>>,
    rollbackable: bool,
}

impl JournalTask {
    pub fn new(level: i32, journal: Arc<Mutex<Vec<String>>>) -> Self {
        JournalTask {
            name: format!("patch{}", level),
            level,
            journal,
            rollbackable: true,
        }
    }

    pub fn without_rollback(mut self) -> Self {
        self.rollbackable = false;
        self
    }
}

impl MigrationTaskProvider for JournalTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn level(&self) -> i32 {
        self.level
    }

    fn up(&self, context: &MigrationContext) -> PatchResult<()> {
        self.journal
            .lock()
            .push(format!("up:{}:{}", context.system_name(), self.level));
        Ok(())
    }

    fn down(&self, context: &MigrationContext) -> PatchResult<()> {
        self.journal
            .lock()
            .push(format!("down:{}:{}", context.system_name(), self.level));
        Ok(())
    }

    fn supports_rollback(&self) -> bool {
        self.rollbackable
    }
}

/// A source that hands out a fixed task list for any location.
pub struct StaticTaskSource {
    levels: Vec<i32>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl StaticTaskSource {
    pub fn new(levels: Vec<i32>, journal: Arc<Mutex<Vec<String>>>) -> Self {
        StaticTaskSource { levels, journal }
    }
}

impl TaskSource for StaticTaskSource {
    fn migration_tasks(&self, _location: &str) -> PatchResult<Vec<MigrationTask>> {
        Ok(self
            .levels
            .iter()
            .map(|level| MigrationTask::new(JournalTask::new(*level, self.journal.clone())))
            .collect())
    }

    fn post_patch_tasks(&self, _location: &str) -> PatchResult<Vec<MigrationTask>> {
        Ok(Vec::new())
    }
}
