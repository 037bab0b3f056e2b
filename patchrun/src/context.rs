use std::fmt::Debug;
use std::sync::Arc;

use crate::errors::PatchResult;
use crate::sql::DatabaseType;

/// Contract a caller-supplied database resource must fulfil.
///
/// The engine never builds connections or pools; the embedding application
/// hands it a context that already knows how to reach one database node. A
/// context carries the system identity, the dialect descriptor, statement
/// execution, the two integer query shapes the patch-info store needs, and
/// transaction control.
///
/// # Thread Safety
///
/// Implementers must be `Send + Sync`; a context may be shared between a
/// launcher and its engine.
pub trait MigrationContextProvider: Send + Sync {
    /// Logical system this context belongs to (the patch-table key).
    fn system_name(&self) -> String;

    /// Dialect descriptor for the database behind this context.
    fn database_type(&self) -> DatabaseType;

    /// Executes one statement, returning the number of affected rows
    /// (0 for DDL).
    fn execute(&self, sql: &str) -> PatchResult<u64>;

    /// Runs a query expected to produce at most one integer value.
    /// `None` means the query produced no row.
    fn query_int(&self, sql: &str) -> PatchResult<Option<i64>>;

    /// Runs a query producing a list of integer values, possibly empty.
    fn query_int_list(&self, sql: &str) -> PatchResult<Vec<i64>>;

    fn commit(&self) -> PatchResult<()>;

    fn rollback(&self) -> PatchResult<()>;

    /// Reads the connection's current auto-commit mode.
    fn is_auto_commit(&self) -> PatchResult<bool>;

    /// Switches the connection's auto-commit mode.
    fn set_auto_commit(&self, auto_commit: bool) -> PatchResult<()>;
}

/// Cloneable handle to a caller-supplied database resource.
///
/// Wraps an `Arc<dyn MigrationContextProvider>`; clones share the underlying
/// provider. A launcher may own several contexts for one logical system
/// (multi-node fan-out), each paired with its own patch-info store.
#[derive(Clone)]
pub struct MigrationContext {
    inner: Arc<dyn MigrationContextProvider>,
}

impl MigrationContext {
    pub fn new<P: MigrationContextProvider + 'static>(provider: P) -> Self {
        MigrationContext {
            inner: Arc::new(provider),
        }
    }

    pub fn system_name(&self) -> String {
        self.inner.system_name()
    }

    pub fn database_type(&self) -> DatabaseType {
        self.inner.database_type()
    }

    pub fn execute(&self, sql: &str) -> PatchResult<u64> {
        self.inner.execute(sql)
    }

    pub fn query_int(&self, sql: &str) -> PatchResult<Option<i64>> {
        self.inner.query_int(sql)
    }

    pub fn query_int_list(&self, sql: &str) -> PatchResult<Vec<i64>> {
        self.inner.query_int_list(sql)
    }

    pub fn commit(&self) -> PatchResult<()> {
        self.inner.commit()
    }

    pub fn rollback(&self) -> PatchResult<()> {
        self.inner.rollback()
    }

    pub fn is_auto_commit(&self) -> PatchResult<bool> {
        self.inner.is_auto_commit()
    }

    pub fn set_auto_commit(&self, auto_commit: bool) -> PatchResult<()> {
        self.inner.set_auto_commit(auto_commit)
    }

    /// Whether two handles point at the same underlying provider.
    pub fn same_as(&self, other: &MigrationContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for MigrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MigrationContext({})", self.inner.system_name())
    }
}
