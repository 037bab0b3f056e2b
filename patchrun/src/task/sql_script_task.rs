use crate::context::MigrationContext;
use crate::errors::{ErrorKind, PatchError, PatchResult};
use crate::sql::split_statements;
use crate::task::MigrationTaskProvider;

/// A migration task backed by raw SQL script text.
///
/// The up and down scripts are split into individually executable statements
/// by the statement-splitting lexer under the context's dialect rules, then
/// executed in order. This is the reference task implementation; embedders
/// with non-SQL work implement [`MigrationTaskProvider`] directly.
///
/// [`MigrationTaskProvider`]: crate::task::MigrationTaskProvider
pub struct SqlScriptMigrationTask {
    name: String,
    level: i32,
    up_sql: String,
    down_sql: Option<String>,
}

impl SqlScriptMigrationTask {
    pub fn new(name: &str, level: i32, up_sql: &str) -> Self {
        SqlScriptMigrationTask {
            name: name.to_string(),
            level,
            up_sql: up_sql.to_string(),
            down_sql: None,
        }
    }

    /// Attaches a rollback script, making the task rollback-capable.
    pub fn with_rollback(mut self, down_sql: &str) -> Self {
        self.down_sql = Some(down_sql.to_string());
        self
    }

    fn run_script(&self, sql: &str, context: &MigrationContext) -> PatchResult<()> {
        let statements = split_statements(sql, &context.database_type());
        log::debug!(
            "Task '{}': executing {} statement(s)",
            self.name,
            statements.len()
        );
        for statement in statements {
            context.execute(&statement)?;
        }
        Ok(())
    }
}

impl MigrationTaskProvider for SqlScriptMigrationTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn level(&self) -> i32 {
        self.level
    }

    fn up(&self, context: &MigrationContext) -> PatchResult<()> {
        self.run_script(&self.up_sql, context)
    }

    fn down(&self, context: &MigrationContext) -> PatchResult<()> {
        match &self.down_sql {
            Some(sql) => self.run_script(sql, context),
            None => Err(PatchError::new(
                &format!("Task '{}' does not support rollback", self.name),
                ErrorKind::RollbackError,
            )),
        }
    }

    fn supports_rollback(&self) -> bool {
        self.down_sql.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::task::MigrationTask;

    #[test]
    fn test_rollback_support_follows_down_script() {
        let plain = MigrationTask::new(SqlScriptMigrationTask::new("t1", 1, "select 1"));
        assert!(!plain.supports_rollback());

        let reversible = MigrationTask::new(
            SqlScriptMigrationTask::new("t2", 2, "create table x (id int)")
                .with_rollback("drop table x"),
        );
        assert!(reversible.supports_rollback());
    }

    #[test]
    fn test_level_and_name_carried() {
        let task = SqlScriptMigrationTask::new("patch0007_add_users", 7, "select 1");
        assert_eq!(task.level(), 7);
        assert_eq!(task.name(), "patch0007_add_users");
    }

    #[test]
    fn test_down_without_script_is_rollback_error() {
        let task = SqlScriptMigrationTask::new("t1", 1, "select 1");
        // no context interaction happens before the error
        let context = crate::context::MigrationContext::new(FailingContext);
        let err = task.down(&context).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::RollbackError);
    }

    struct FailingContext;

    impl crate::context::MigrationContextProvider for FailingContext {
        fn system_name(&self) -> String {
            "test".to_string()
        }

        fn database_type(&self) -> crate::sql::DatabaseType {
            crate::sql::DatabaseType::new("postgres").unwrap()
        }

        fn execute(&self, _sql: &str) -> PatchResult<u64> {
            panic!("execute must not be reached");
        }

        fn query_int(&self, _sql: &str) -> PatchResult<Option<i64>> {
            panic!("query must not be reached");
        }

        fn query_int_list(&self, _sql: &str) -> PatchResult<Vec<i64>> {
            panic!("query must not be reached");
        }

        fn commit(&self) -> PatchResult<()> {
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
}
