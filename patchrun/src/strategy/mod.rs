//! Run strategies: what should run, what counts as in sync, and what is a
//! valid rollback target.
//!
//! Strategies are stateless policies over [`StoreSnapshot`] views. They are
//! selected by a configuration name through an explicit string-keyed
//! registry; an unresolvable name is a fatal configuration error and a blank
//! name selects the ordered strategy.
//!
//! [`StoreSnapshot`]: crate::store::StoreSnapshot

mod missing_patch;
mod ordered;

use indexmap::IndexMap;
use itertools::Itertools;
use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::errors::{ErrorKind, PatchError, PatchResult};
use crate::store::StoreSnapshot;
use crate::task::MigrationTask;

pub use missing_patch::MissingPatchStrategy;
pub use ordered::OrderedStrategy;

/// Registry key of the default strategy.
pub const ORDERED_STRATEGY: &str = "ordered";
/// Registry key of the missing-patch strategy.
pub const MISSING_PATCH_STRATEGY: &str = "missing-patch";

/// Policy deciding which tasks run, when two systems are in sync, and which
/// tasks are valid rollback candidates.
///
/// Implementations must be stateless: every decision is a pure function of
/// the arguments.
pub trait RunStrategy: Send + Sync + std::fmt::Debug {
    /// The registry key this strategy is known by.
    fn name(&self) -> &'static str;

    /// Whether a task at `task_level` should run against a system in the
    /// given state.
    fn should_run(&self, task_level: i32, snapshot: &StoreSnapshot) -> bool;

    /// Whether two systems are at the same patch state.
    fn is_sync(&self, a: &StoreSnapshot, b: &StoreSnapshot) -> bool;

    /// Selects and orders the tasks to roll back for the given targets.
    ///
    /// The returned tasks are in execution order. Strategies differ in what
    /// `targets` means; see [`OrderedStrategy`] and [`MissingPatchStrategy`].
    fn rollback_candidates(
        &self,
        tasks: &[MigrationTask],
        targets: &[i32],
        snapshot: &StoreSnapshot,
    ) -> PatchResult<Vec<MigrationTask>>;
}

type StrategyConstructor = fn() -> Arc<dyn RunStrategy>;

static STRATEGY_REGISTRY: Lazy<IndexMap<&'static str, StrategyConstructor>> = Lazy::new(|| {
    IndexMap::from([
        (
            ORDERED_STRATEGY,
            (|| Arc::new(OrderedStrategy) as Arc<dyn RunStrategy>) as StrategyConstructor,
        ),
        (
            MISSING_PATCH_STRATEGY,
            (|| Arc::new(MissingPatchStrategy) as Arc<dyn RunStrategy>) as StrategyConstructor,
        ),
    ])
});

/// Resolves a strategy by its configured name.
///
/// A blank or absent name selects [`OrderedStrategy`]. An unknown name is a
/// fatal `ConfigurationError` naming the known keys.
pub fn resolve_strategy(name: &str) -> PatchResult<Arc<dyn RunStrategy>> {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        return Ok(STRATEGY_REGISTRY[ORDERED_STRATEGY]());
    }
    match STRATEGY_REGISTRY.get(key.as_str()) {
        Some(constructor) => Ok(constructor()),
        None => {
            log::error!("Unknown run strategy '{}'", name);
            Err(PatchError::new(
                &format!(
                    "Unknown run strategy '{}'; known strategies: {}",
                    name,
                    STRATEGY_REGISTRY.keys().join(", ")
                ),
                ErrorKind::ConfigurationError,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_name_selects_ordered() {
        assert_eq!(resolve_strategy("").unwrap().name(), ORDERED_STRATEGY);
        assert_eq!(resolve_strategy("   ").unwrap().name(), ORDERED_STRATEGY);
    }

    #[test]
    fn test_names_resolve_case_insensitively() {
        assert_eq!(
            resolve_strategy("Missing-Patch").unwrap().name(),
            MISSING_PATCH_STRATEGY
        );
        assert_eq!(resolve_strategy("ORDERED").unwrap().name(), ORDERED_STRATEGY);
    }

    #[test]
    fn test_unknown_name_is_configuration_error() {
        let err = resolve_strategy("chronological").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ConfigurationError);
        assert!(err.message().contains("ordered"));
        assert!(err.message().contains("missing-patch"));
    }
}
