//! Owned transaction handle with a hard deadline.
//!
//! `RuleTx` checks a connection out of the pool, opens a transaction, and
//! applies the remaining deadline to every statement it runs. Savepoints
//! are managed explicitly: the engine needs `ROLLBACK TO SAVEPOINT` to
//! isolate one rule's failure while keeping the surrounding transaction
//! (including the error written to the rule row) alive.

use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::warn;

use super::pool::PgConnection;
use super::store::StoreError;

pub struct RuleTx {
    conn: Option<PgConnection>,
    deadline: Instant,
    open: bool,
}

impl RuleTx {
    pub(crate) async fn begin(conn: PgConnection, budget: Duration) -> Result<Self, StoreError> {
        let tx = Self {
            conn: Some(conn),
            deadline: Instant::now() + budget,
            open: true,
        };
        tx.batch("BEGIN").await?;
        Ok(tx)
    }

    fn conn(&self) -> &PgConnection {
        self.conn
            .as_ref()
            .expect("transaction connection is only taken on commit/rollback/drop")
    }

    /// Run a statement batch; template SQL may contain several statements.
    pub(crate) async fn batch(&self, sql: &str) -> Result<(), StoreError> {
        self.bounded(self.conn().batch_execute(sql))
            .await?
            .map_err(StoreError::from_db)
    }

    pub(crate) async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, StoreError> {
        self.bounded(self.conn().execute(sql, params))
            .await?
            .map_err(StoreError::from_db)
    }

    pub(crate) async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, StoreError> {
        self.bounded(self.conn().query(sql, params))
            .await?
            .map_err(StoreError::from_db)
    }

    /// Establish a named savepoint inside the transaction.
    pub async fn savepoint(&self, name: &str) -> Result<(), StoreError> {
        debug_assert!(is_plain_identifier(name));
        self.batch(&format!("SAVEPOINT {name}")).await
    }

    /// Roll back to a named savepoint, discarding the work since it.
    pub async fn rollback_to_savepoint(&self, name: &str) -> Result<(), StoreError> {
        debug_assert!(is_plain_identifier(name));
        self.batch(&format!("ROLLBACK TO SAVEPOINT {name}")).await
    }

    /// Commit and return the connection to the pool.
    pub async fn commit(mut self) -> Result<(), StoreError> {
        self.open = false;
        let result = self.batch("COMMIT").await;
        drop(self.conn.take());
        result
    }

    /// Roll back and return the connection to the pool.
    pub async fn rollback(mut self) -> Result<(), StoreError> {
        self.open = false;
        let result = self.batch("ROLLBACK").await;
        drop(self.conn.take());
        result
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T, StoreError> {
        timeout_at(self.deadline, fut)
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl Drop for RuleTx {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        // A dropped-open transaction must not leak into the pool; roll it
        // back on a detached task before the connection is recycled.
        if let Some(conn) = self.conn.take() {
            warn!("transaction dropped without commit or rollback");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(err) = conn.batch_execute("ROLLBACK").await {
                        warn!(error = %err, "rollback of dropped transaction failed");
                    }
                    drop(conn);
                });
            }
        }
    }
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savepoint_names_are_restricted() {
        assert!(is_plain_identifier("rule"));
        assert!(is_plain_identifier("rule_1"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("rule; DROP TABLE x"));
        assert!(!is_plain_identifier("Rule"));
    }
}
