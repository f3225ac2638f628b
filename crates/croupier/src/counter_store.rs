use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;

/// One row of the server identity counter. The row with the largest id is the
/// last identity handed out; rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRow {
    pub id: i64,
    pub hostname: String,
    pub created_at: DateTime<Utc>,
}

/// Result of inserting a counter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another server inserted the same id first.
    Conflict,
}

/// Durable table backing server identity allocation.
///
/// Uniqueness of `id` is enforced by the store, not by the caller: two
/// concurrent inserts of the same id must yield exactly one `Inserted`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Largest id present, or 0 when the table is empty.
    async fn query_max_id(&self) -> Result<i64, CoordinationError>;

    async fn insert(&self, row: &CounterRow) -> Result<InsertOutcome, CoordinationError>;
}
