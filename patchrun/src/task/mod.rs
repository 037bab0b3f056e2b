//! Migration tasks and task discovery.
//!
//! A task is one atomic, levelled schema-change unit with an up action and an
//! optional down action. Tasks are rediscovered fresh on every invocation and
//! never persisted; the patch-info store remembers only levels.

mod migration_task;
mod source;
mod sql_script_task;

pub use migration_task::{MigrationTask, MigrationTaskProvider};
pub use source::{SqlScriptTaskSource, TaskSource};
pub use sql_script_task::SqlScriptMigrationTask;
