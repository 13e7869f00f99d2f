//! Rule catalog store and reconciliation SQL against PostgreSQL.
//!
//! The store owns one table, `<schema>.<table>`, created by a declarative
//! self-migration, and joins it against the live information schema to
//! answer "which rules match which tables". Values that originate outside
//! the service (rule fields, table names, principal lists) always travel
//! as bind parameters; only configuration-supplied identifiers are
//! interpolated, through [`quote_ident`].

use std::time::Duration;

use thiserror::Error;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::debug;

use crate::domain::{short_id, Rule};

use super::pool::{PgConnection, PgPool, PoolError};
use super::tx::RuleTx;

/// Declarative mapping of rule fields to SQL columns; the migration, the
/// CRUD statements, and row decoding all derive from this table.
const RULE_COLUMNS: &[(&str, &str, &str)] = &[
    ("Id", "text", "primary key"),
    ("Description", "text", ""),
    ("Priority", "integer", ""),
    ("Group", "text", ""),
    ("TableRegEx", "text", ""),
    ("Users", "text[]", ""),
    ("Roles", "text[]", ""),
    ("CommandTemplate", "text", ""),
    ("DeleteTemplate", "text", ""),
    ("Errors", "text[]", ""),
    ("CompletedRun", "boolean", "not null default false"),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("rule not found")]
    NotFound,
    #[error("database connection failed: {message}")]
    Connection { message: String },
    #[error("database query failed: {message}")]
    Query { message: String },
    #[error("transaction deadline exceeded")]
    Timeout,
}

impl StoreError {
    pub(crate) fn from_db(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return Self::Connection {
                message: err.to_string(),
            };
        }
        let message = match err.as_db_error() {
            Some(db_err) => db_err.message().to_string(),
            None => err.to_string(),
        };
        Self::Query { message }
    }
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        Self::Connection {
            message: err.to_string(),
        }
    }
}

/// PostgreSQL-backed rule store.
#[derive(Clone)]
pub struct PgRuleStore {
    pool: PgPool,
    qualified: String,
    statement_timeout: Duration,
}

impl PgRuleStore {
    /// Construct the store and run the schema self-migration.
    pub async fn connect(
        pool: PgPool,
        schema: &str,
        table: &str,
        statement_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            qualified: format!("{}.{}", quote_ident(schema), quote_ident(table)),
            statement_timeout,
        };
        store.migrate(schema).await?;
        Ok(store)
    }

    async fn migrate(&self, schema: &str) -> Result<(), StoreError> {
        let tx = self.begin().await?;
        tx.batch(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))
            .await?;
        tx.batch(&migration_sql(&self.qualified)).await?;
        tx.commit().await
    }

    /// Open a transaction bounded by the configured statement deadline.
    pub async fn begin(&self) -> Result<RuleTx, StoreError> {
        let conn = self.pool.get().await?;
        RuleTx::begin(conn, self.statement_timeout).await
    }

    pub async fn insert_rule(&self, rule: &Rule, tx: &RuleTx) -> Result<(), StoreError> {
        tx.execute(&insert_sql(&self.qualified), &rule_params(rule))
            .await?;
        Ok(())
    }

    /// Replace every mutable column of the rule row. `NotFound` when no
    /// row carries the id.
    pub async fn update_rule(&self, rule: &Rule, tx: &RuleTx) -> Result<(), StoreError> {
        let mut params = rule_params(rule);
        params.push(&rule.id);
        let affected = tx.execute(&update_sql(&self.qualified), &params).await?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_rule(&self, id: &str, tx: &RuleTx) -> Result<(), StoreError> {
        let affected = tx
            .execute(
                &format!("DELETE FROM {} WHERE \"Id\" = $1", self.qualified),
                &[&id],
            )
            .await?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn get_rule(&self, id: &str, tx: &RuleTx) -> Result<Rule, StoreError> {
        let rows = tx
            .query(
                &format!(
                    "SELECT {} FROM {} WHERE \"Id\" = $1",
                    column_list(""),
                    self.qualified
                ),
                &[&id],
            )
            .await?;
        match rows.first() {
            Some(row) => Ok(row_to_rule(row)),
            None => Err(StoreError::NotFound),
        }
    }

    /// Page through rules ordered by id. Reads outside any transaction.
    pub async fn list_rules(&self, limit: i64, offset: i64) -> Result<Vec<Rule>, StoreError> {
        let rows = self
            .pool_query(
                &format!(
                    "SELECT {} FROM {} ORDER BY \"Id\" LIMIT $1 OFFSET $2",
                    column_list(""),
                    self.qualified
                ),
                &[&limit, &offset],
            )
            .await?;
        Ok(rows.iter().map(row_to_rule).collect())
    }

    /// Names of public-schema tables matching any of the given rules'
    /// regexes.
    pub async fn find_matching_tables(
        &self,
        rule_ids: &[String],
        tx: &RuleTx,
    ) -> Result<Vec<String>, StoreError> {
        let rows = tx
            .query(&matching_tables_sql(&self.qualified), &[&rule_ids])
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// At most one rule per group applicable to `table`, selected by
    /// maximum priority (ties broken by id), restricted to rules whose
    /// regex matches the table and whose users or roles intersect the
    /// given owner sets.
    pub async fn find_matching_rules_with_owner_info(
        &self,
        table: &str,
        user_ids: &[String],
        roles: &[String],
        limit_to_rule_ids: Option<&[String]>,
        tx: &RuleTx,
    ) -> Result<Vec<Rule>, StoreError> {
        let sql = matching_rules_sql(&self.qualified, limit_to_rule_ids.is_some());
        let rows = match limit_to_rule_ids {
            Some(rule_ids) => {
                tx.query(&sql, &[&table, &roles, &user_ids, &rule_ids]).await?
            }
            None => tx.query(&sql, &[&table, &roles, &user_ids]).await?,
        };
        Ok(rows.iter().map(row_to_rule).collect())
    }

    /// Names of tables belonging to the device with the given long id.
    pub async fn find_device_tables(&self, device_id: &str) -> Result<Vec<String>, StoreError> {
        let short = short_id::shorten(device_id).map_err(|err| StoreError::Query {
            message: err.to_string(),
        })?;
        // Short ids may contain '_', which LIKE treats as a wildcard.
        let pattern = format!("device:{}%", short.replace('_', "\\_"));
        let rows = self
            .pool_query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_name LIKE $1 \
                 ORDER BY table_name",
                &[&pattern],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// Ordered column names of a public-schema table; the first column is
    /// the time column by convention.
    pub async fn get_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let rows = self
            .pool_query(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 \
                 ORDER BY ordinal_position",
                &[&table],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// Run template-produced SQL inside the transaction. The text may hold
    /// several statements.
    pub async fn exec(&self, sql: &str, tx: &RuleTx) -> Result<(), StoreError> {
        debug!(sql, "executing rule statement");
        tx.batch(sql).await
    }

    /// Take the session-scoped advisory lock on a dedicated connection.
    /// The returned connection must be handed back to [`Self::advisory_unlock`];
    /// the lock lives and dies with its session.
    pub async fn advisory_lock(&self, key: i64) -> Result<PgConnection, StoreError> {
        let conn = self.pool.get().await?;
        conn.execute("SELECT pg_advisory_lock($1)", &[&key])
            .await
            .map_err(StoreError::from_db)?;
        Ok(conn)
    }

    /// Release the advisory lock on the connection that took it.
    pub async fn advisory_unlock(&self, conn: &PgConnection, key: i64) -> Result<(), StoreError> {
        let row = conn
            .query_one("SELECT pg_advisory_unlock($1)", &[&key])
            .await
            .map_err(StoreError::from_db)?;
        if !row.get::<_, bool>(0) {
            return Err(StoreError::Query {
                message: format!("advisory lock {key} was not held by this session"),
            });
        }
        Ok(())
    }

    async fn pool_query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, StoreError> {
        let conn = self.pool.get().await?;
        tokio::time::timeout(self.statement_timeout, conn.query(sql, params))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(StoreError::from_db)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(prefix: &str) -> String {
    RULE_COLUMNS
        .iter()
        .map(|(name, _, _)| format!("{prefix}{}", quote_ident(name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn migration_sql(qualified: &str) -> String {
    let columns = RULE_COLUMNS
        .iter()
        .map(|(name, sql_type, extra)| {
            if extra.is_empty() {
                format!("{} {sql_type}", quote_ident(name))
            } else {
                format!("{} {sql_type} {extra}", quote_ident(name))
            }
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "CREATE TABLE IF NOT EXISTS {qualified} (\n{columns}\n);\n\
         ALTER TABLE {qualified} ADD COLUMN IF NOT EXISTS \"CompletedRun\" boolean not null default false;"
    )
}

fn insert_sql(qualified: &str) -> String {
    let placeholders = (1..=RULE_COLUMNS.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {qualified} ({}) VALUES ({placeholders})",
        column_list("")
    )
}

fn update_sql(qualified: &str) -> String {
    let assignments = RULE_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, (name, _, _))| format!("{} = ${}", quote_ident(name), i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {qualified} SET {assignments} WHERE \"Id\" = ${}",
        RULE_COLUMNS.len() + 1
    )
}

fn matching_tables_sql(qualified: &str) -> String {
    format!(
        "SELECT DISTINCT t.table_name FROM information_schema.tables t, {qualified} r \
         WHERE t.table_schema = 'public' \
         AND t.table_name ~ r.\"TableRegEx\" \
         AND r.\"Id\" = ANY($1) \
         ORDER BY t.table_name"
    )
}

fn matching_rules_sql(qualified: &str, limit_to_rule_ids: bool) -> String {
    let mut sql = format!(
        "SELECT DISTINCT ON (r.\"Group\") {} \
         FROM information_schema.tables t, {qualified} r \
         WHERE t.table_schema = 'public' \
         AND t.table_name ~ r.\"TableRegEx\" \
         AND t.table_name = $1 \
         AND (r.\"Roles\" && $2 OR r.\"Users\" && $3)",
        column_list("r.")
    );
    if limit_to_rule_ids {
        sql.push_str(" AND r.\"Id\" = ANY($4)");
    }
    // DISTINCT ON keeps the first row per group, so the priority sort
    // below selects the winner; the id column makes ties deterministic.
    sql.push_str(" ORDER BY r.\"Group\", r.\"Priority\" DESC, r.\"Id\"");
    sql
}

fn rule_params(rule: &Rule) -> Vec<&(dyn ToSql + Sync)> {
    vec![
        &rule.id,
        &rule.description,
        &rule.priority,
        &rule.group,
        &rule.table_reg_ex,
        &rule.users,
        &rule.roles,
        &rule.command_template,
        &rule.delete_template,
        &rule.errors,
        &rule.completed_run,
    ]
}

fn row_to_rule(row: &Row) -> Rule {
    Rule {
        id: row.get(0),
        description: row.get(1),
        priority: row.get(2),
        group: row.get(3),
        table_reg_ex: row.get(4),
        users: row.get::<_, Option<Vec<String>>>(5).unwrap_or_default(),
        roles: row.get::<_, Option<Vec<String>>>(6).unwrap_or_default(),
        command_template: row.get(7),
        delete_template: row.get(8),
        errors: row.get::<_, Option<Vec<String>>>(9).unwrap_or_default(),
        completed_run: row.get(10),
    }
}
