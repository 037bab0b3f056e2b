use dashmap::DashMap;
use indexmap::IndexMap;
use itertools::Itertools;
use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::errors::{ErrorKind, PatchError, PatchResult};

/// Database types with built-in statement property tables.
const KNOWN_DATABASE_TYPES: [&str; 5] = ["postgres", "mysql", "oracle", "sqlserver", "hsqldb"];

/// Database types where a standalone `GO` line terminates a statement.
const GO_TERMINATED_TYPES: [&str; 1] = ["sqlserver"];

/// Property key controlling whether one execute call may carry several statements.
pub(crate) const MULTI_STATEMENT_KEY: &str = "supportsMultipleStatements";

/// Describes one target database dialect.
///
/// A `DatabaseType` carries three things the engine needs to know about a
/// database family:
///
/// * the keyed DDL/DML statement texts used by the SQL patch-info store
///   (`patches.create`, `level.read`, `lock.obtain`, ...), seeded from a
///   built-in table and overridable per deployment via [`set_property`];
/// * whether the driver accepts several `;`-separated statements in one
///   execute call (`supportsMultipleStatements`);
/// * the stored-procedure prefixes that suppress `;` splitting so a whole
///   procedure body travels as one statement.
///
/// Handles are cheap to clone and share their property table.
///
/// [`set_property`]: DatabaseType::set_property
#[derive(Clone)]
pub struct DatabaseType {
    inner: Arc<DatabaseTypeInner>,
}

struct DatabaseTypeInner {
    name: String,
    properties: DashMap<String, String>,
    procedure_prefixes: Vec<&'static str>,
}

impl DatabaseType {
    /// Creates a database type descriptor for the named dialect.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the name is not one of the built-in
    /// dialects.
    pub fn new(name: &str) -> PatchResult<Self> {
        let name = name.trim().to_lowercase();
        if !KNOWN_DATABASE_TYPES.contains(&name.as_str()) {
            log::error!("Unknown database type '{}'", name);
            return Err(PatchError::new(
                &format!(
                    "Unknown database type '{}'; known types: {}",
                    name,
                    KNOWN_DATABASE_TYPES.iter().join(", ")
                ),
                ErrorKind::ConfigurationError,
            ));
        }

        let properties = DashMap::new();
        for (key, value) in default_statements(&name) {
            properties.insert(key.to_string(), value.to_string());
        }

        Ok(DatabaseType {
            inner: Arc::new(DatabaseTypeInner {
                procedure_prefixes: procedure_prefixes(&name),
                name,
                properties,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Looks up a keyed statement property.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` when the key has no value; the patch
    /// run must fail before any mutation in that case.
    pub fn property(&self, key: &str) -> PatchResult<String> {
        match self.inner.properties.get(key) {
            Some(value) => Ok(value.value().clone()),
            None => {
                log::error!(
                    "No '{}' statement configured for database type '{}'",
                    key,
                    self.inner.name
                );
                Err(PatchError::new(
                    &format!(
                        "No '{}' statement configured for database type '{}'",
                        key, self.inner.name
                    ),
                    ErrorKind::ConfigurationError,
                ))
            }
        }
    }

    /// Overrides a keyed statement property for this deployment.
    pub fn set_property(&self, key: &str, value: &str) {
        self.inner
            .properties
            .insert(key.to_string(), value.to_string());
    }

    /// Whether one execute call may carry several `;`-separated statements.
    pub fn supports_multiple_statements(&self) -> bool {
        self.inner
            .properties
            .get(MULTI_STATEMENT_KEY)
            .map(|v| v.value().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Whether a standalone `GO` line is an additional statement terminator.
    pub fn is_go_terminated(&self) -> bool {
        GO_TERMINATED_TYPES.contains(&self.inner.name.as_str())
    }

    /// Whether the accumulated statement buffer opens a stored procedure.
    ///
    /// Matching is case-insensitive, ignores leading whitespace, and only
    /// matches whole leading words, so `beginning_of_names` does not read as
    /// `begin`.
    pub fn is_stored_procedure_start(&self, buffer: &str) -> bool {
        if self.inner.procedure_prefixes.is_empty() {
            return false;
        }
        let head = buffer
            .trim_start()
            .split_whitespace()
            .take(8)
            .join(" ")
            .to_lowercase();
        self.inner
            .procedure_prefixes
            .iter()
            .any(|prefix| head == *prefix || head.starts_with(&format!("{} ", prefix)))
    }
}

impl std::fmt::Debug for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DatabaseType({})", self.inner.name)
    }
}

fn procedure_prefixes(name: &str) -> Vec<&'static str> {
    match name {
        "oracle" => vec![
            "begin",
            "create or replace function",
            "create or replace procedure",
            "create or replace method",
            "create or replace package",
        ],
        "postgres" => vec![
            "create or replace function",
            "create or replace procedure",
            "create function",
            "create procedure",
        ],
        "mysql" | "sqlserver" => vec!["create procedure", "create function"],
        _ => vec![],
    }
}

/// Statement texts shared by every dialect; `?` placeholders are bound
/// positionally by the SQL patch-info store.
static BASE_STATEMENTS: Lazy<IndexMap<&'static str, &'static str>> = Lazy::new(|| {
    IndexMap::from([
        (
            "patches.create",
            "CREATE TABLE patches (system_name VARCHAR(32) NOT NULL, patch_level INT, \
             patch_in_progress INT, PRIMARY KEY (system_name)); \
             CREATE TABLE patch_history (system_name VARCHAR(32) NOT NULL, \
             patch_level INT NOT NULL, PRIMARY KEY (system_name, patch_level))",
        ),
        (
            "level.exists",
            "SELECT COUNT(*) FROM patches WHERE system_name = ?",
        ),
        (
            "level.create",
            "INSERT INTO patches (system_name, patch_level, patch_in_progress) VALUES (?, 0, 0)",
        ),
        (
            "level.read",
            "SELECT patch_level FROM patches WHERE system_name = ?",
        ),
        // params: level, system, system, level
        (
            "level.update",
            "UPDATE patches SET patch_level = ? WHERE system_name = ?; \
             INSERT INTO patch_history (system_name, patch_level) VALUES (?, ?)",
        ),
        // params: system, level, system, system
        (
            "level.rollback",
            "DELETE FROM patch_history WHERE system_name = ? AND patch_level = ?; \
             UPDATE patches SET patch_level = (SELECT COALESCE(MAX(patch_level), 0) \
             FROM patch_history WHERE system_name = ?) WHERE system_name = ?",
        ),
        (
            "lock.read",
            "SELECT patch_in_progress FROM patches WHERE system_name = ?",
        ),
        (
            "lock.obtain",
            "UPDATE patches SET patch_in_progress = 1 WHERE system_name = ? AND patch_in_progress = 0",
        ),
        (
            "lock.release",
            "UPDATE patches SET patch_in_progress = 0 WHERE system_name = ?",
        ),
        (
            "patches.all",
            "SELECT patch_level FROM patch_history WHERE system_name = ? ORDER BY patch_level",
        ),
        (MULTI_STATEMENT_KEY, "false"),
    ])
});

fn default_statements(name: &str) -> IndexMap<&'static str, &'static str> {
    let mut statements = BASE_STATEMENTS.clone();
    match name {
        "oracle" => {
            statements.insert(
                "patches.create",
                "CREATE TABLE patches (system_name VARCHAR2(32) NOT NULL, patch_level NUMBER(9), \
                 patch_in_progress NUMBER(1), PRIMARY KEY (system_name)); \
                 CREATE TABLE patch_history (system_name VARCHAR2(32) NOT NULL, \
                 patch_level NUMBER(9) NOT NULL, PRIMARY KEY (system_name, patch_level))",
            );
        }
        "sqlserver" => {
            statements.insert(MULTI_STATEMENT_KEY, "true");
        }
        _ => {}
    }
    statements
}
