use std::collections::BTreeSet;

use crate::context::MigrationContext;
use crate::errors::{ErrorKind, PatchError, PatchResult};
use crate::sql::split_statements;
use crate::store::PatchInfoStoreProvider;

/// Positional parameter for a keyed statement.
pub(crate) enum SqlParam {
    Int(i64),
    Text(String),
}

impl SqlParam {
    fn render(&self) -> String {
        match self {
            SqlParam::Int(value) => value.to_string(),
            SqlParam::Text(value) => format!("'{}'", value.replace('\'', "''")),
        }
    }
}

/// Binds `?` placeholders positionally. The placeholder count and the
/// parameter count must match exactly so a bad per-deployment override fails
/// loudly instead of mangling the statement.
pub(crate) fn bind(template: &str, params: &[SqlParam]) -> PatchResult<String> {
    let placeholder_count = template.matches('?').count();
    if placeholder_count != params.len() {
        return Err(PatchError::new(
            &format!(
                "Statement expects {} parameter(s) but {} were supplied: {}",
                placeholder_count,
                params.len(),
                template
            ),
            ErrorKind::ConfigurationError,
        ));
    }
    let mut bound = String::with_capacity(template.len());
    let mut pieces = template.split('?');
    if let Some(first) = pieces.next() {
        bound.push_str(first);
    }
    for (piece, param) in pieces.zip(params) {
        bound.push_str(&param.render());
        bound.push_str(piece);
    }
    Ok(bound)
}

/// The reference patch-info store: one record per system in a patch table,
/// with an applied-level history table and an in-progress lock flag.
///
/// All DDL/DML comes from the context's [`DatabaseType`] keyed properties, so
/// a deployment can reshape the backing schema without touching code. Every
/// mutation commits the context immediately; lock and level state must be
/// visible to other instances as soon as the write is acknowledged.
///
/// Keyed statements are run through the statement splitter when the dialect
/// does not support multi-statement execution, so one property may carry
/// several statements.
///
/// [`DatabaseType`]: crate::sql::DatabaseType
pub struct SqlPatchInfoStore {
    context: MigrationContext,
}

impl SqlPatchInfoStore {
    pub fn new(context: MigrationContext) -> Self {
        SqlPatchInfoStore { context }
    }

    fn statement(&self, key: &str) -> PatchResult<String> {
        self.context.database_type().property(key)
    }

    fn run_mutation(&self, key: &str, params: &[SqlParam]) -> PatchResult<u64> {
        let text = bind(&self.statement(key)?, params)?;
        let database_type = self.context.database_type();
        let mut affected = 0;
        for statement in split_statements(&text, &database_type) {
            affected += self.context.execute(&statement)?;
        }
        self.context.commit()?;
        Ok(affected)
    }

    fn query_single(&self, key: &str, params: &[SqlParam]) -> PatchResult<Option<i64>> {
        self.context.query_int(&bind(&self.statement(key)?, params)?)
    }

    fn query_list(&self, key: &str, params: &[SqlParam]) -> PatchResult<Vec<i64>> {
        self.context
            .query_int_list(&bind(&self.statement(key)?, params)?)
    }

    fn system_param(&self) -> SqlParam {
        SqlParam::Text(self.context.system_name())
    }
}

impl PatchInfoStoreProvider for SqlPatchInfoStore {
    fn system_name(&self) -> String {
        self.context.system_name()
    }

    fn create_if_needed(&self) -> PatchResult<()> {
        let system = self.context.system_name();
        let exists = match self.query_single("level.exists", &[self.system_param()]) {
            Ok(count) => count.unwrap_or(0) > 0,
            Err(err) => {
                log::debug!(
                    "Patch tables for system '{}' not readable ({}); creating them",
                    system,
                    err.message()
                );
                // clear any aborted transaction state left by the failed probe
                let _ = self.context.rollback();
                self.run_mutation("patches.create", &[])?;
                false
            }
        };
        if !exists {
            log::info!("Seeding patch level 0 for new system '{}'", system);
            self.run_mutation("level.create", &[self.system_param()])?;
        }
        Ok(())
    }

    fn patch_level(&self) -> PatchResult<i32> {
        let level = self.query_single("level.read", &[self.system_param()])?;
        Ok(level.unwrap_or(0) as i32)
    }

    fn update_patch_level(&self, level: i32) -> PatchResult<()> {
        // params: level, system, system, level
        self.run_mutation(
            "level.update",
            &[
                SqlParam::Int(level as i64),
                self.system_param(),
                self.system_param(),
                SqlParam::Int(level as i64),
            ],
        )?;
        Ok(())
    }

    fn update_patch_level_after_rollback(&self, level: i32) -> PatchResult<()> {
        // params: system, level, system, system
        self.run_mutation(
            "level.rollback",
            &[
                self.system_param(),
                SqlParam::Int(level as i64),
                self.system_param(),
                self.system_param(),
            ],
        )?;
        Ok(())
    }

    fn is_locked(&self) -> PatchResult<bool> {
        let flag = self.query_single("lock.read", &[self.system_param()])?;
        Ok(flag.unwrap_or(0) != 0)
    }

    fn lock(&self) -> PatchResult<()> {
        let affected = self.run_mutation("lock.obtain", &[self.system_param()])?;
        if affected == 0 {
            return Err(PatchError::new(
                &format!(
                    "Patch lock for system '{}' is held by another invocation",
                    self.context.system_name()
                ),
                ErrorKind::AlreadyLocked,
            ));
        }
        Ok(())
    }

    fn unlock(&self) -> PatchResult<()> {
        self.run_mutation("lock.release", &[self.system_param()])?;
        Ok(())
    }

    fn is_patch_applied(&self, level: i32) -> PatchResult<bool> {
        Ok(self.patches_applied()?.contains(&level))
    }

    fn patches_applied(&self) -> PatchResult<BTreeSet<i32>> {
        let levels = self.query_list("patches.all", &[self.system_param()])?;
        Ok(levels.into_iter().map(|l| l as i32).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MigrationContextProvider;
    use crate::sql::DatabaseType;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Records every statement it is handed and serves scripted query
    /// responses, so tests can assert the exact statement stream the store
    /// produces.
    #[derive(Clone)]
    struct ScriptedContext {
        database_type: DatabaseType,
        state: Arc<Mutex<ScriptedState>>,
    }

    #[derive(Default)]
    struct ScriptedState {
        executed: Vec<String>,
        commits: usize,
        int_responses: VecDeque<PatchResult<Option<i64>>>,
        list_responses: VecDeque<Vec<i64>>,
        affected_rows: VecDeque<u64>,
    }

    impl ScriptedContext {
        fn new(dialect: &str) -> Self {
            ScriptedContext {
                database_type: DatabaseType::new(dialect).unwrap(),
                state: Arc::new(Mutex::new(ScriptedState::default())),
            }
        }

        fn push_int(&self, response: PatchResult<Option<i64>>) {
            self.state.lock().int_responses.push_back(response);
        }

        fn push_affected(&self, rows: u64) {
            self.state.lock().affected_rows.push_back(rows);
        }

        fn executed(&self) -> Vec<String> {
            self.state.lock().executed.clone()
        }

        fn commits(&self) -> usize {
            self.state.lock().commits
        }
    }

    impl MigrationContextProvider for ScriptedContext {
        fn system_name(&self) -> String {
            "orders".to_string()
        }

        fn database_type(&self) -> DatabaseType {
            self.database_type.clone()
        }

        fn execute(&self, sql: &str) -> PatchResult<u64> {
            let mut state = self.state.lock();
            state.executed.push(sql.to_string());
            Ok(state.affected_rows.pop_front().unwrap_or(1))
        }

        fn query_int(&self, _sql: &str) -> PatchResult<Option<i64>> {
            self.state
                .lock()
                .int_responses
                .pop_front()
                .unwrap_or(Ok(None))
        }

        fn query_int_list(&self, _sql: &str) -> PatchResult<Vec<i64>> {
            Ok(self
                .state
                .lock()
                .list_responses
                .pop_front()
                .unwrap_or_default())
        }

        fn commit(&self) -> PatchResult<()> {
            self.state.lock().commits += 1;
            Ok(())
        }

        fn rollback(&self) -> PatchResult<()> {
            Ok(())
        }

        fn is_auto_commit(&self) -> PatchResult<bool> {
            Ok(true)
        }

        fn set_auto_commit(&self, _auto_commit: bool) -> PatchResult<()> {
            Ok(())
        }
    }

    // ==================== bind() Tests ====================

    #[test]
    fn test_bind_substitutes_in_order() {
        let bound = bind(
            "UPDATE patches SET patch_level = ? WHERE system_name = ?",
            &[SqlParam::Int(4), SqlParam::Text("orders".to_string())],
        )
        .unwrap();
        assert_eq!(
            bound,
            "UPDATE patches SET patch_level = 4 WHERE system_name = 'orders'"
        );
    }

    #[test]
    fn test_bind_escapes_quotes_in_text() {
        let bound = bind(
            "SELECT 1 FROM patches WHERE system_name = ?",
            &[SqlParam::Text("o'brien".to_string())],
        )
        .unwrap();
        assert!(bound.contains("'o''brien'"));
    }

    #[test]
    fn test_bind_count_mismatch_is_configuration_error() {
        let err = bind("SELECT ? FROM t WHERE x = ?", &[SqlParam::Int(1)]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ConfigurationError);
    }

    // ==================== Store Behavior ====================

    #[test]
    fn test_lock_binds_system_name_and_commits() {
        let context = ScriptedContext::new("postgres");
        let store = SqlPatchInfoStore::new(MigrationContext::new(context.clone()));

        store.lock().unwrap();

        let executed = context.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].contains("patch_in_progress = 1"));
        assert!(executed[0].contains("'orders'"));
        assert_eq!(context.commits(), 1);
    }

    #[test]
    fn test_lock_race_surfaces_already_locked() {
        let context = ScriptedContext::new("postgres");
        context.push_affected(0);
        let store = SqlPatchInfoStore::new(MigrationContext::new(context));

        let err = store.lock().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::AlreadyLocked);
    }

    #[test]
    fn test_update_patch_level_splits_when_dialect_requires_it() {
        // postgres drivers take one statement per execute; the keyed
        // level.update text carries two
        let context = ScriptedContext::new("postgres");
        let store = SqlPatchInfoStore::new(MigrationContext::new(context.clone()));

        store.update_patch_level(4).unwrap();

        let executed = context.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].starts_with("UPDATE patches SET patch_level = 4"));
        assert!(executed[1].starts_with("INSERT INTO patch_history"));
        assert_eq!(context.commits(), 1);
    }

    #[test]
    fn test_update_patch_level_passes_whole_text_when_supported() {
        let context = ScriptedContext::new("sqlserver");
        let store = SqlPatchInfoStore::new(MigrationContext::new(context.clone()));

        store.update_patch_level(4).unwrap();

        assert_eq!(context.executed().len(), 1);
    }

    #[test]
    fn test_create_if_needed_builds_tables_and_seeds() {
        let context = ScriptedContext::new("postgres");
        context.push_int(Err(PatchError::new(
            "relation \"patches\" does not exist",
            ErrorKind::StoreError,
        )));
        let store = SqlPatchInfoStore::new(MigrationContext::new(context.clone()));

        store.create_if_needed().unwrap();

        let executed = context.executed();
        assert!(executed.iter().any(|s| s.starts_with("CREATE TABLE patches")));
        assert!(executed.iter().any(|s| s.starts_with("CREATE TABLE patch_history")));
        assert!(executed.iter().any(|s| s.starts_with("INSERT INTO patches")));
    }

    #[test]
    fn test_create_if_needed_skips_existing_system() {
        let context = ScriptedContext::new("postgres");
        context.push_int(Ok(Some(1)));
        let store = SqlPatchInfoStore::new(MigrationContext::new(context.clone()));

        store.create_if_needed().unwrap();

        assert!(context.executed().is_empty());
    }

    #[test]
    fn test_patch_level_defaults_to_zero() {
        let context = ScriptedContext::new("postgres");
        context.push_int(Ok(None));
        let store = SqlPatchInfoStore::new(MigrationContext::new(context));
        assert_eq!(store.patch_level().unwrap(), 0);
    }

    #[test]
    fn test_is_locked_reads_flag() {
        let context = ScriptedContext::new("postgres");
        context.push_int(Ok(Some(1)));
        context.push_int(Ok(Some(0)));
        let store = SqlPatchInfoStore::new(MigrationContext::new(context));
        assert!(store.is_locked().unwrap());
        assert!(!store.is_locked().unwrap());
    }

    #[test]
    fn test_rollback_statement_stream() {
        let context = ScriptedContext::new("postgres");
        let store = SqlPatchInfoStore::new(MigrationContext::new(context.clone()));

        store.update_patch_level_after_rollback(5).unwrap();

        let executed = context.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].starts_with("DELETE FROM patch_history"));
        assert!(executed[0].contains("patch_level = 5"));
        assert!(executed[1].contains("COALESCE(MAX(patch_level), 0)"));
    }
}
