//! PostgreSQL session
//!
//! Wraps a single `tokio_postgres` connection. The connection task is spawned on the
//! current runtime; the session is passed explicitly through the pipeline.

use tokio_postgres::{Client, NoTls, Transaction};
use tracing::{debug, error, info};

use super::{DatabaseError, DatabaseResult, describe, query_failed, sql};
use crate::config::{Credentials, DbSection};

/// Execute a parameterless statement inside a transaction
pub async fn execute(tx: &Transaction<'_>, statement: &str) -> DatabaseResult<()> {
    debug!("{}", statement);
    tx.batch_execute(statement)
        .await
        .map_err(|e| query_failed(statement, e))
}

/// Commit a transaction, or release a savepoint
pub async fn commit(tx: Transaction<'_>) -> DatabaseResult<()> {
    tx.commit().await.map_err(|e| {
        DatabaseError::TransactionFailed(format!("Failed to commit: {}", describe(&e)))
    })
}

/// Roll back a transaction, or roll back to a savepoint
pub async fn rollback(tx: Transaction<'_>) -> DatabaseResult<()> {
    tx.rollback().await.map_err(|e| {
        DatabaseError::TransactionFailed(format!("Failed to roll back: {}", describe(&e)))
    })
}

/// Open a savepoint inside a transaction
///
/// Work done through the returned handle is undone by [`rollback`] without aborting the
/// enclosing transaction, and kept by [`commit`].
pub async fn savepoint<'a>(tx: &'a mut Transaction<'_>) -> DatabaseResult<Transaction<'a>> {
    tx.transaction().await.map_err(|e| {
        DatabaseError::TransactionFailed(format!("Failed to open savepoint: {}", describe(&e)))
    })
}

/// One database connection, owned by a pipeline run
pub struct Session {
    client: Client,
}

impl Session {
    /// Connect using the configured settings and credentials
    pub async fn connect(db: &DbSection, credentials: &Credentials) -> DatabaseResult<Self> {
        info!("Connecting to {} as {}", db.display_target(), credentials.user);
        Self::connect_with(&db.pg_config(credentials)).await
    }

    /// Connect from a `postgresql://` URL or key/value connection string
    pub async fn connect_url(url: &str) -> DatabaseResult<Self> {
        let config: tokio_postgres::Config = url.parse().map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Invalid connection string: {}", e))
        })?;
        Self::connect_with(&config).await
    }

    /// Connect with a prepared driver configuration
    pub async fn connect_with(config: &tokio_postgres::Config) -> DatabaseResult<Self> {
        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            DatabaseError::ConnectionFailed(format!(
                "Failed to connect to PostgreSQL: {}",
                describe(&e)
            ))
        })?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self { client })
    }

    /// The underlying client, for statements outside a transaction
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Start a transaction; it rolls back when dropped without commit
    pub async fn transaction(&mut self) -> DatabaseResult<Transaction<'_>> {
        self.client.transaction().await.map_err(|e| {
            DatabaseError::TransactionFailed(format!("Failed to begin: {}", describe(&e)))
        })
    }

    /// Run one or more statements without parameters
    pub async fn batch_execute(&self, statement: &str) -> DatabaseResult<()> {
        debug!("{}", statement);
        self.client
            .batch_execute(statement)
            .await
            .map_err(|e| query_failed(statement, e))
    }

    /// Check whether a table is visible on the search path
    pub async fn table_exists(&self, table: &str) -> DatabaseResult<bool> {
        let row = self
            .client
            .query_one(
                "SELECT to_regclass($1) IS NOT NULL",
                &[&sql::table_ref(table)],
            )
            .await
            .map_err(|e| query_failed("Failed to look up table", e))?;
        Ok(row.get(0))
    }

    /// Check whether a named constraint is defined on a table
    pub async fn constraint_exists(&self, table: &str, constraint: &str) -> DatabaseResult<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_constraint WHERE conrelid = to_regclass($1) AND conname = $2)",
                &[&sql::table_ref(table), &constraint],
            )
            .await
            .map_err(|e| query_failed("Failed to look up constraint", e))?;
        Ok(row.get(0))
    }

    /// Number of rows in a table
    pub async fn row_count(&self, table: &str) -> DatabaseResult<i64> {
        self.scalar_count(&sql::count_rows(&sql::table_ref(table)))
            .await
    }

    /// Run a `SELECT COUNT(*)`-shaped query
    pub async fn scalar_count(&self, statement: &str) -> DatabaseResult<i64> {
        debug!("{}", statement);
        let row = self
            .client
            .query_one(statement, &[])
            .await
            .map_err(|e| query_failed(statement, e))?;
        Ok(row.get(0))
    }
}
