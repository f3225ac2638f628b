use crate::types::RoundNo;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the coordination layer.
///
/// Lock contention is deliberately absent: losing a lock is reported as
/// `Ok(false)` by the lock and as a duplicate by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("store error: {reason}")]
    Store {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("serialization error: {reason}")]
    Serialization {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("server id allocation failed after {attempts} attempts")]
    AllocationExhausted {
        attempts: u32,
        #[source]
        source: Option<BoxError>,
    },

    #[error("round {round_no} could not be bound after {attempts} attempts")]
    RoundBindTimeout { round_no: RoundNo, attempts: u32 },

    #[error("round registry error: {reason}")]
    Registry {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("listener {listener} failed: {reason}")]
    Listener { listener: String, reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("coordinator is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    ClockDriftExceeded(#[from] crate::snowflake::SnowflakeError),
}

impl CoordinationError {
    pub(crate) fn store(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn serialization(reason: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store { .. } | Self::Registry { .. } | Self::RoundBindTimeout { .. }
        )
    }
}
