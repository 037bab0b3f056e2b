use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::errors::{ErrorKind, PatchError, PatchResult};
use crate::task::{MigrationTask, SqlScriptMigrationTask};

/// Discovers migration tasks at a configured location.
///
/// A source must return an empty set (never an error) for a location with no
/// matches; errors are reserved for malformed task definitions such as a
/// patch script whose name cannot be parsed.
pub trait TaskSource: Send + Sync {
    /// Primary, levelled tasks found at the location.
    fn migration_tasks(&self, location: &str) -> PatchResult<Vec<MigrationTask>>;

    /// Post-patch tasks found at the location; these run on every migration
    /// pass regardless of patch level.
    fn post_patch_tasks(&self, location: &str) -> PatchResult<Vec<MigrationTask>>;
}

static PATCH_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^patch(\d+)(?:_(.+))?\.sql$").expect("patch name pattern"));
static ROLLBACK_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^patch(\d+)-rollback(?:_(.+))?\.sql$").expect("rollback name pattern"));
static POST_PATCH_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^post-patch.*\.sql$").expect("post-patch name pattern"));

/// The reference task source: scans a directory for SQL patch scripts.
///
/// Recognized file names:
///
/// * `patch<N>[_description].sql` — the up script for level `N`;
/// * `patch<N>-rollback[_description].sql` — the down script joined to the
///   level-`N` task;
/// * `post-patch*.sql` — post-patch scripts, run in name order on every pass.
///
/// Any other `patch*.sql` name is a malformed task definition and fails the
/// run before anything executes. Files that don't look like patch scripts are
/// ignored. A missing directory is treated as a location with no matches.
pub struct SqlScriptTaskSource;

impl SqlScriptTaskSource {
    pub fn new() -> Self {
        SqlScriptTaskSource
    }

    fn script_names(&self, location: &str) -> PatchResult<Vec<String>> {
        let dir = Path::new(location);
        if !dir.is_dir() {
            log::debug!("Patch location '{}' does not exist; no tasks", location);
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_script(&self, location: &str, name: &str) -> PatchResult<String> {
        let contents = fs::read_to_string(Path::new(location).join(name))?;
        Ok(contents)
    }
}

impl Default for SqlScriptTaskSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSource for SqlScriptTaskSource {
    fn migration_tasks(&self, location: &str) -> PatchResult<Vec<MigrationTask>> {
        let names = self.script_names(location)?;

        // duplicate file levels are preserved as duplicate tasks here; the
        // engine's uniqueness validation reports them as fatal
        let mut up_scripts: Vec<(i32, String, String)> = Vec::new();
        let mut rollback_scripts: BTreeMap<i32, String> = BTreeMap::new();

        for name in &names {
            if let Some(captures) = ROLLBACK_NAME.captures(name) {
                let level: i32 = captures[1].parse()?;
                rollback_scripts.insert(level, self.read_script(location, name)?);
            } else if let Some(captures) = PATCH_NAME.captures(name) {
                let level: i32 = captures[1].parse()?;
                let stem = name.trim_end_matches(".sql").to_string();
                up_scripts.push((level, stem, self.read_script(location, name)?));
            } else if name.starts_with("patch") && name.ends_with(".sql") {
                log::error!("Malformed patch script name '{}' in '{}'", name, location);
                return Err(PatchError::new(
                    &format!(
                        "Malformed patch script name '{}' in '{}'; expected \
                         patch<N>[_description].sql or patch<N>-rollback_<description>.sql",
                        name, location
                    ),
                    ErrorKind::ConfigurationError,
                ));
            }
        }

        for level in rollback_scripts.keys() {
            if !up_scripts.iter().any(|(l, _, _)| l == level) {
                return Err(PatchError::new(
                    &format!(
                        "Rollback script for level {} in '{}' has no matching patch script",
                        level, location
                    ),
                    ErrorKind::ConfigurationError,
                ));
            }
        }

        up_scripts.sort_by_key(|(level, _, _)| *level);
        let mut tasks = Vec::with_capacity(up_scripts.len());
        for (level, task_name, up_sql) in up_scripts {
            let mut task = SqlScriptMigrationTask::new(&task_name, level, &up_sql);
            if let Some(down_sql) = rollback_scripts.get(&level) {
                task = task.with_rollback(down_sql);
            }
            tasks.push(MigrationTask::new(task));
        }
        log::debug!("Found {} patch task(s) in '{}'", tasks.len(), location);
        Ok(tasks)
    }

    fn post_patch_tasks(&self, location: &str) -> PatchResult<Vec<MigrationTask>> {
        let names = self.script_names(location)?;
        let mut tasks = Vec::new();
        for (index, name) in names
            .iter()
            .filter(|n| POST_PATCH_NAME.is_match(n))
            .enumerate()
        {
            let stem = name.trim_end_matches(".sql");
            let sql = self.read_script(location, name)?;
            // post-patch levels only order execution; they are never persisted
            tasks.push(MigrationTask::new(SqlScriptMigrationTask::new(
                stem,
                (index + 1) as i32,
                &sql,
            )));
        }
        Ok(tasks)
    }
}
