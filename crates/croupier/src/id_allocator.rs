use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::counter_store::{CounterRow, CounterStore, InsertOutcome};
use crate::error::CoordinationError;
use crate::types::ServerId;

/// Assigns each process a fleet-unique numeric identity from the counter table.
///
/// Optimistic: read the current maximum, try to insert `max + 1`, and start
/// over when another server got there first. Transient store failures are
/// retried the same way. The loop is bounded; exhaustion is fatal to the caller.
pub struct IdAllocator {
    store: Arc<dyn CounterStore>,
    hostname: String,
    max_attempts: u32,
    backoff: Duration,
}

impl IdAllocator {
    pub fn new(
        store: Arc<dyn CounterStore>,
        hostname: impl Into<String>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            store,
            hostname: hostname.into(),
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Allocate a new identity. Each successful call inserts exactly one row.
    pub async fn allocate(&self) -> Result<ServerId, CoordinationError> {
        let mut last_error: Option<CoordinationError> = None;

        for attempt in 1..=self.max_attempts {
            match self.try_once().await {
                Ok(Some(id)) => {
                    tracing::info!(server_id = %id, attempt, hostname = %self.hostname, "server identity allocated");
                    return Ok(id);
                }
                Ok(None) => {
                    tracing::debug!(attempt, "server id insert lost the race, retrying");
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "server id allocation attempt failed");
                    last_error = Some(e);
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }

        tracing::error!(
            attempts = self.max_attempts,
            "server id allocation exhausted"
        );
        Err(CoordinationError::AllocationExhausted {
            attempts: self.max_attempts,
            source: last_error.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
        })
    }

    async fn try_once(&self) -> Result<Option<ServerId>, CoordinationError> {
        let max = self.store.query_max_id().await?;
        let row = CounterRow {
            id: max + 1,
            hostname: self.hostname.clone(),
            created_at: Utc::now(),
        };
        match self.store.insert(&row).await? {
            InsertOutcome::Inserted => Ok(Some(ServerId::new(row.id))),
            InsertOutcome::Conflict => Ok(None),
        }
    }
}
