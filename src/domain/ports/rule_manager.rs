//! Inbound port the HTTP adapter drives.

use async_trait::async_trait;

use crate::domain::{Error, Rule, TypedRule};

/// Use-case surface of the reconciliation engine.
///
/// Mutating operations serialize behind the engine's lock manager; `get`
/// and `list` are lock-free reads. Create and update spawn the background
/// rule runner; completion is observable through the rule's
/// `completed_run` flag on a subsequent get.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleManager: Send + Sync {
    /// Persist a new rule. Fails with `InvalidRequest` when the caller set
    /// an id.
    async fn create_rule(&self, rule: Rule) -> Result<TypedRule, Error>;

    /// Replace a rule's mutable fields and reset `completed_run`.
    async fn update_rule(&self, rule: Rule) -> Result<(), Error>;

    /// Run the rule's delete template against every matching table, then
    /// remove the rule. Refuses with `Conflict` when any delete template
    /// finishes with errors.
    async fn delete_rule(&self, id: &str) -> Result<(), Error>;

    async fn get_rule(&self, id: &str) -> Result<TypedRule, Error>;

    async fn list_rules(&self, limit: i64, offset: i64) -> Result<Vec<TypedRule>, Error>;

    /// Reconcile every table matched by any stored rule.
    async fn apply_all_rules(&self) -> Result<(), Error>;

    /// Reconcile a single table, optionally with delete templates.
    async fn apply_all_rules_for_table(&self, table: &str, use_delete: bool)
        -> Result<(), Error>;
}
