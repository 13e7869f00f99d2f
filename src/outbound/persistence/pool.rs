//! Async connection pool for raw PostgreSQL connections.
//!
//! The rule store speaks SQL directly (regex joins against the information
//! schema, savepoint choreography, template-produced DDL), so the pool
//! hands out plain `tokio_postgres` clients via `bb8`. Checkout uses
//! `get_owned` so transactions and the advisory-lock guard can hold their
//! connection without borrowing the pool.

use std::time::Duration;

use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use thiserror::Error;
use tokio_postgres::NoTls;
use tracing::info;

/// A connection checked out of the pool, owned by its holder.
pub type PgConnection = bb8::PooledConnection<'static, PostgresConnectionManager<NoTls>>;

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Failed to check out a connection from the pool.
    #[error("failed to get connection from pool: {message}")]
    Checkout { message: String },

    /// Failed to build the connection pool.
    #[error("failed to build connection pool: {message}")]
    Build { message: String },
}

impl PoolError {
    pub fn checkout(message: impl Into<String>) -> Self {
        Self::Checkout {
            message: message.into(),
        }
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }
}

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    host: String,
    port: u16,
    user: String,
    password: String,
    dbname: String,
    max_size: u32,
    connection_timeout: Duration,
}

impl PoolConfig {
    /// Create a new configuration for the given endpoint and database.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        dbname: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            dbname: dbname.into(),
            max_size: 10,
            connection_timeout: Duration::from_secs(30),
        }
    }

    /// Set the maximum number of connections in the pool.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the connection checkout timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.dbname);
        config
    }
}

/// Async PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgPool {
    inner: Pool<PostgresConnectionManager<NoTls>>,
}

impl PgPool {
    /// Build the pool and verify connectivity with a round trip.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Build` when the pool cannot be constructed or
    /// the verification query fails.
    pub async fn connect(config: PoolConfig) -> Result<Self, PoolError> {
        info!(
            host = %config.host,
            port = config.port,
            dbname = %config.dbname,
            "connecting to PostgreSQL"
        );
        let manager = PostgresConnectionManager::new(config.to_pg_config(), NoTls);
        let inner = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|err| PoolError::build(err.to_string()))?;

        let pool = Self { inner };
        let conn = pool.get().await.map_err(|err| PoolError::build(err.to_string()))?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|err| PoolError::build(err.to_string()))?;
        Ok(pool)
    }

    /// Check a connection out of the pool, owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Checkout` when no connection becomes available
    /// within the configured timeout.
    pub async fn get(&self) -> Result<PgConnection, PoolError> {
        self.inner
            .get_owned()
            .await
            .map_err(|err| PoolError::checkout(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn pool_config_default_values() {
        let config = PoolConfig::new("localhost", 5432, "postgres", "secret", "tsdb");

        assert_eq!(config.max_size, 10);
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
    }

    #[rstest]
    fn pool_config_builder_pattern() {
        let config = PoolConfig::new("localhost", 5432, "postgres", "secret", "tsdb")
            .with_max_size(20)
            .with_connection_timeout(Duration::from_secs(5));

        assert_eq!(config.max_size, 20);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }

    #[rstest]
    fn pool_error_display() {
        let checkout_err = PoolError::checkout("connection refused");
        let build_err = PoolError::build("invalid endpoint");

        assert!(checkout_err.to_string().contains("connection refused"));
        assert!(build_err.to_string().contains("invalid endpoint"));
    }
}
