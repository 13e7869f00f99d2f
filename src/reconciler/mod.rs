//! Rule reconciliation engine.
//!
//! Every path that mutates the physical schema or the rule catalog runs
//! behind the [`LockManager`] and inside one transaction. Within a pass
//! over a table, each rule executes under a savepoint so a broken template
//! rolls back its own DDL only; the error written to the rule row happens
//! after the savepoint rollback and therefore survives into the commit.

mod classify;
mod lock;

pub use classify::TableClassifier;
pub use lock::{FatalHook, LockGuard, LockManager};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::domain::ports::{EventSink, RuleManager};
use crate::domain::{sql_template, Error, Rule, TypedRule};
use crate::outbound::persistence::{PgRuleStore, RuleTx, StoreError};
use crate::outbound::templates::TemplateStore;

/// Savepoint bounding a single rule's side effects.
const RULE_SAVEPOINT: &str = "rule";
/// Page size for the full sweep over the rule catalog.
const SWEEP_PAGE_SIZE: i64 = 1000;

/// The reconciliation engine; cheap to clone, shared across handlers,
/// consumers, and spawned rule runners.
#[derive(Clone)]
pub struct RuleController {
    inner: Arc<Inner>,
}

struct Inner {
    store: PgRuleStore,
    classifier: TableClassifier,
    templates: Arc<TemplateStore>,
    locks: LockManager,
}

impl RuleController {
    pub fn new(
        store: PgRuleStore,
        classifier: TableClassifier,
        templates: Arc<TemplateStore>,
        locks: LockManager,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                classifier,
                templates,
                locks,
            }),
        }
    }

    fn store(&self) -> &PgRuleStore {
        &self.inner.store
    }

    /// Apply the matching rules to one table inside `tx`.
    ///
    /// Returns whether every rule ran cleanly. A failing rule rolls back
    /// to its savepoint, records `"<table>: <error>"` on its row, and the
    /// loop continues; only infrastructure failures abort the pass.
    async fn apply_rules_for_table(
        &self,
        table: &str,
        use_delete_template: bool,
        limit_to_rule_ids: Option<&[String]>,
        tx: &RuleTx,
    ) -> Result<bool, Error> {
        match limit_to_rule_ids {
            Some(ids) => debug!(table, rule_ids = ?ids, "applying rules to table"),
            None => debug!(table, "applying all rules to table"),
        }

        let mut all_ran_ok = true;
        let mut info = self.inner.classifier.classify(table).await?;
        self.inner.classifier.merge_realm_roles(&mut info).await?;
        debug!(
            table,
            users = ?info.user_ids,
            roles = ?info.roles,
            "resolved table owners"
        );

        let rules = self
            .store()
            .find_matching_rules_with_owner_info(
                table,
                &info.user_ids,
                &info.roles,
                limit_to_rule_ids,
                tx,
            )
            .await
            .map_err(map_store_error)?;

        if !rules.is_empty() {
            info.columns = self.store().get_columns(table).await.map_err(map_store_error)?;
        }

        for mut rule in rules {
            debug!(rule_id = %rule.id, table, "applying rule");
            let template = if use_delete_template {
                &rule.delete_template
            } else {
                &rule.command_template
            };
            tx.savepoint(RULE_SAVEPOINT).await.map_err(map_store_error)?;

            let outcome = match sql_template::render(template, &info) {
                Ok(sql) => self
                    .store()
                    .exec(&sql, tx)
                    .await
                    .map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            };

            if let Err(message) = outcome {
                all_ran_ok = false;
                tx.rollback_to_savepoint(RULE_SAVEPOINT)
                    .await
                    .map_err(map_store_error)?;
                rule.errors.push(format!("{table}: {message}"));
                self.store()
                    .update_rule(&rule, tx)
                    .await
                    .map_err(map_store_error)?;
            }
        }

        Ok(all_ran_ok)
    }

    /// Background runner spawned after create/update: reconcile every
    /// table the rule matches and flip `completed_run` on a clean pass.
    /// Any recorded error rolls the whole transaction back and persists
    /// the errored rule in a fresh one.
    async fn run_rule(&self, mut rule: Rule) {
        debug!(rule_id = %rule.id, "running rule");
        let guard = match self.inner.locks.acquire().await {
            Ok(guard) => guard,
            Err(err) => {
                error!(rule_id = %rule.id, error = %err, "could not lock for rule run");
                return;
            }
        };
        self.run_rule_locked(&mut rule).await;
        self.inner.locks.release(guard).await;
    }

    async fn run_rule_locked(&self, rule: &mut Rule) {
        rule.errors.clear();
        let tx = match self.store().begin().await {
            Ok(tx) => tx,
            Err(err) => {
                error!(rule_id = %rule.id, error = %err, "could not open transaction");
                return;
            }
        };

        let rule_ids = [rule.id.clone()];
        let tables = match self.store().find_matching_tables(&rule_ids, &tx).await {
            Ok(tables) => tables,
            Err(err) => {
                rule.errors.push(err.to_string());
                self.rollback_and_save(tx, rule).await;
                return;
            }
        };
        debug!(rule_id = %rule.id, ?tables, "rule matches tables");

        for table in tables {
            if let Err(err) = self
                .apply_rules_for_table(&table, false, Some(&rule_ids), &tx)
                .await
            {
                rule.errors.push(err.to_string());
                self.rollback_and_save(tx, rule).await;
                return;
            }
            // Re-read so errors recorded by the pass above are observed.
            match self.store().get_rule(&rule.id, &tx).await {
                Ok(fresh) => *rule = fresh,
                Err(err) => {
                    rule.errors.push(err.to_string());
                    self.rollback_and_save(tx, rule).await;
                    return;
                }
            }
            if !rule.errors.is_empty() {
                self.rollback_and_save(tx, rule).await;
                return;
            }
        }

        rule.completed_run = true;
        if let Err(err) = self.store().update_rule(rule, &tx).await {
            error!(rule_id = %rule.id, error = %err, "could not mark rule completed");
            return;
        }
        if let Err(err) = tx.commit().await {
            error!(rule_id = %rule.id, error = %err, "could not commit rule run");
            return;
        }
        debug!(rule_id = %rule.id, "rule finished run, committed changes");
    }

    /// Discard the run's side effects but keep its error record: roll the
    /// transaction back, then persist the rule in a fresh one.
    async fn rollback_and_save(&self, tx: RuleTx, rule: &Rule) {
        warn!(rule_id = %rule.id, errors = ?rule.errors, "rolling back rule run");
        if let Err(err) = tx.rollback().await {
            error!(rule_id = %rule.id, error = %err, "rollback failed");
        }
        if let Err(err) = self.save_rule(rule).await {
            error!(rule_id = %rule.id, error = %err, "could not persist rule errors");
        }
    }

    async fn save_rule(&self, rule: &Rule) -> Result<(), StoreError> {
        let tx = self.store().begin().await?;
        self.store().update_rule(rule, &tx).await?;
        tx.commit().await
    }

    fn spawn_rule_run(&self, rule: Rule) {
        let runner = self.clone();
        tokio::spawn(async move {
            runner.run_rule(rule).await;
        });
    }

    fn typed(&self, rule: Rule) -> TypedRule {
        TypedRule::classify(rule, &self.inner.templates.snapshot())
    }
}

#[async_trait]
impl RuleManager for RuleController {
    async fn create_rule(&self, rule: Rule) -> Result<TypedRule, Error> {
        if !rule.id.is_empty() {
            return Err(Error::invalid_request("may not specify id yourself"));
        }
        let mut rule = rule;
        rule.id = Uuid::new_v4().to_string();
        rule.completed_run = false;
        rule.errors.clear();

        let tx = self.store().begin().await.map_err(map_store_error)?;
        self.store()
            .insert_rule(&rule, &tx)
            .await
            .map_err(map_store_error)?;
        tx.commit().await.map_err(map_store_error)?;

        self.spawn_rule_run(rule.clone());
        Ok(self.typed(rule))
    }

    async fn update_rule(&self, rule: Rule) -> Result<(), Error> {
        let mut rule = rule;
        rule.completed_run = false;

        let tx = self.store().begin().await.map_err(map_store_error)?;
        self.store()
            .update_rule(&rule, &tx)
            .await
            .map_err(map_store_error)?;
        tx.commit().await.map_err(map_store_error)?;

        self.spawn_rule_run(rule);
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> Result<(), Error> {
        let guard = self.inner.locks.acquire().await?;
        debug!(rule_id = id, "locked for rule deletion");
        let result = self.delete_rule_locked(id).await;
        self.inner.locks.release(guard).await;
        result
    }

    async fn get_rule(&self, id: &str) -> Result<TypedRule, Error> {
        let tx = self.store().begin().await.map_err(map_store_error)?;
        let rule = self.store().get_rule(id, &tx).await.map_err(map_store_error)?;
        if let Err(err) = tx.rollback().await {
            warn!(error = %err, "could not close read transaction");
        }
        Ok(self.typed(rule))
    }

    async fn list_rules(&self, limit: i64, offset: i64) -> Result<Vec<TypedRule>, Error> {
        let rules = self
            .store()
            .list_rules(limit, offset)
            .await
            .map_err(map_store_error)?;
        Ok(rules.into_iter().map(|rule| self.typed(rule)).collect())
    }

    async fn apply_all_rules(&self) -> Result<(), Error> {
        let guard = self.inner.locks.acquire().await?;
        debug!("locked for full rule sweep");
        let result = self.apply_all_rules_locked().await;
        self.inner.locks.release(guard).await;
        result
    }

    async fn apply_all_rules_for_table(
        &self,
        table: &str,
        use_delete_template: bool,
    ) -> Result<(), Error> {
        let guard = self.inner.locks.acquire().await?;
        debug!(table, "locked for single-table reconciliation");
        let result = async {
            let tx = self.store().begin().await.map_err(map_store_error)?;
            self.apply_rules_for_table(table, use_delete_template, None, &tx)
                .await?;
            tx.commit().await.map_err(map_store_error)
        }
        .await;
        self.inner.locks.release(guard).await;
        result
    }
}

impl RuleController {
    async fn delete_rule_locked(&self, id: &str) -> Result<(), Error> {
        let tx = self.store().begin().await.map_err(map_store_error)?;
        let rule_ids = [id.to_string()];
        let tables = self
            .store()
            .find_matching_tables(&rule_ids, &tx)
            .await
            .map_err(map_store_error)?;
        for table in tables {
            let all_ran_ok = self
                .apply_rules_for_table(&table, true, Some(&rule_ids), &tx)
                .await?;
            if !all_ran_ok {
                return Err(Error::conflict(
                    "rule has delete template that finished with errors. \
                     Will not delete rule to avoid inconsistencies",
                ));
            }
        }
        self.store()
            .delete_rule(id, &tx)
            .await
            .map_err(map_store_error)?;
        tx.commit().await.map_err(map_store_error)
    }

    async fn apply_all_rules_locked(&self) -> Result<(), Error> {
        let tx = self.store().begin().await.map_err(map_store_error)?;
        let mut offset = 0;
        loop {
            let rules = self
                .store()
                .list_rules(SWEEP_PAGE_SIZE, offset)
                .await
                .map_err(map_store_error)?;
            let rule_ids: Vec<String> = rules.iter().map(|rule| rule.id.clone()).collect();

            let tables = self
                .store()
                .find_matching_tables(&rule_ids, &tx)
                .await
                .map_err(map_store_error)?;
            for table in tables {
                let all_ran_ok = self
                    .apply_rules_for_table(&table, false, Some(&rule_ids), &tx)
                    .await?;
                if !all_ran_ok {
                    warn!(table, "not all rules could be applied without errors");
                }
            }

            offset += rules.len() as i64;
            if (rules.len() as i64) < SWEEP_PAGE_SIZE {
                break;
            }
        }
        tx.commit().await.map_err(map_store_error)
    }
}

#[async_trait]
impl EventSink for RuleController {
    async fn reconcile_tables(&self, tables: &[String]) -> Result<(), Error> {
        let guard = self.inner.locks.acquire().await?;
        debug!(?tables, "locked for table-change reconciliation");
        let result = async {
            let tx = self.store().begin().await.map_err(map_store_error)?;
            for table in tables {
                self.apply_rules_for_table(table, false, None, &tx).await?;
            }
            tx.commit().await.map_err(map_store_error)
        }
        .await;
        self.inner.locks.release(guard).await;
        result
    }

    async fn reconcile_device_tables(&self, device_id: &str) -> Result<(), Error> {
        let guard = self.inner.locks.acquire().await?;
        debug!(device_id, "locked for permission-change reconciliation");
        let result = async {
            let tx = self.store().begin().await.map_err(map_store_error)?;
            let tables = self
                .store()
                .find_device_tables(device_id)
                .await
                .map_err(map_store_error)?;
            for table in tables {
                self.apply_rules_for_table(&table, false, None, &tx).await?;
            }
            tx.commit().await.map_err(map_store_error)
        }
        .await;
        self.inner.locks.release(guard).await;
        result
    }
}

fn map_store_error(err: StoreError) -> Error {
    match err {
        StoreError::NotFound => Error::not_found("rule not found"),
        StoreError::Timeout | StoreError::Connection { .. } => Error::unavailable(err.to_string()),
        StoreError::Query { .. } => Error::internal(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;

    #[test]
    fn store_errors_map_to_service_codes() {
        assert_eq!(
            map_store_error(StoreError::NotFound).code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            map_store_error(StoreError::Timeout).code(),
            ErrorCode::ServiceUnavailable
        );
        assert_eq!(
            map_store_error(StoreError::Connection {
                message: "closed".into()
            })
            .code(),
            ErrorCode::ServiceUnavailable
        );
        assert_eq!(
            map_store_error(StoreError::Query {
                message: "syntax".into()
            })
            .code(),
            ErrorCode::InternalError
        );
    }
}
