//! Query execution seam.
//!
//! The facade never talks to a database directly. It hands compiled native
//! queries to a [`QueryExecutor`]; [`PgExecutor`] runs sea-query statements
//! against PostgreSQL.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sea_query::SelectStatement;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::adapter::SqlAdapter;
use crate::config::Config;

/// Runs compiled native queries of type `Q`.
#[async_trait]
pub trait QueryExecutor<Q>: Send + Sync
where
    Q: Send + Sync,
{
    /// Fetch all rows as JSON objects.
    async fn fetch_all(&self, query: &Q) -> Result<Vec<serde_json::Value>>;

    /// Count the rows the query selects.
    async fn fetch_count(&self, query: &Q) -> Result<u64>;
}

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL environment variable is required to run queries")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Executes SQL statements on a PostgreSQL pool.
///
/// Every statement runs in its own transaction with `SET LOCAL
/// statement_timeout`, so the timeout resets on commit or rollback.
#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgExecutor {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        let timeout_ms = self.statement_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await
            .context("failed to set statement timeout")?;

        Ok(tx)
    }
}

#[async_trait]
impl QueryExecutor<SelectStatement> for PgExecutor {
    async fn fetch_all(&self, query: &SelectStatement) -> Result<Vec<serde_json::Value>> {
        let sql = SqlAdapter::to_sql(query);
        tracing::debug!(sql = %sql, "executing query");

        let mut tx = self.begin().await?;
        let rows: Vec<serde_json::Value> =
            sqlx::query_scalar(&format!("SELECT row_to_json(t) FROM ({sql}) t"))
                .fetch_all(&mut *tx)
                .await
                .context("failed to execute query")?;
        tx.commit()
            .await
            .context("failed to commit query transaction")?;

        Ok(rows)
    }

    async fn fetch_count(&self, query: &SelectStatement) -> Result<u64> {
        let sql = SqlAdapter::to_sql(query);
        tracing::debug!(sql = %sql, "executing count query");

        let mut tx = self.begin().await?;
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM ({sql}) t"))
            .fetch_one(&mut *tx)
            .await
            .context("failed to execute count query")?;
        tx.commit()
            .await
            .context("failed to commit query transaction")?;

        u64::try_from(total).context("count query returned a negative total")
    }
}
