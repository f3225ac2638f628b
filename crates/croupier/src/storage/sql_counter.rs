//! SQL-backed server identity counter using PostgreSQL via sqlx.
//!
//! Table:
//! - `croupier_server_ids`: one row per allocated server identity
//!
//! This module is only available when the `sql` feature is enabled.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::counter_store::{CounterRow, CounterStore, InsertOutcome};
use crate::error::CoordinationError;

/// PostgreSQL-backed counter table.
pub struct SqlCounterStore {
    pool: PgPool,
}

impl SqlCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), CoordinationError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| CoordinationError::store(format!("migration failed: {e}"), e))
    }
}

#[async_trait]
impl CounterStore for SqlCounterStore {
    async fn query_max_id(&self) -> Result<i64, CoordinationError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM croupier_server_ids")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoordinationError::store(format!("failed to read max server id: {e}"), e))?;
        Ok(max.unwrap_or(0))
    }

    async fn insert(&self, row: &CounterRow) -> Result<InsertOutcome, CoordinationError> {
        // The primary key decides the race; a lost race inserts nothing.
        let result = sqlx::query(
            r#"
            INSERT INTO croupier_server_ids (id, hostname, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(row.id)
        .bind(&row.hostname)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoordinationError::store(format!("failed to insert server id: {e}"), e))?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Conflict)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }
}
