use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Error returned when the snowflake generator cannot produce an ID.
#[derive(Debug, thiserror::Error)]
pub enum SnowflakeError {
    /// The system clock jumped backward by more than the maximum tolerable drift.
    #[error(
        "system clock jumped backward by {drift_ms}ms (>{max_drift_ms}ms max), check NTP configuration"
    )]
    ClockDriftExceeded { drift_ms: i64, max_drift_ms: i64 },
}

/// Custom epoch: 2025-01-01T00:00:00Z in milliseconds since Unix epoch.
const CUSTOM_EPOCH_MS: i64 = 1_735_689_600_000;

/// Maximum tolerable backward clock drift in milliseconds.
const MAX_CLOCK_DRIFT_MS: i64 = 5_000;

const NODE_ID_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const NODE_ID_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = NODE_ID_BITS + SEQUENCE_BITS;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

/// A 64-bit composite id.
/// Layout: 42-bit timestamp (ms since custom epoch), 10-bit node ID, 12-bit sequence.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Snowflake(pub i64);

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decomposed parts of a Snowflake ID.
#[derive(Debug, Clone, Copy)]
pub struct SnowflakeParts {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub node_id: NodeId,
    pub sequence: i32,
}

impl Snowflake {
    pub fn compose(timestamp_ms: i64, node_id: NodeId, sequence: i64) -> Self {
        Self(
            ((timestamp_ms - CUSTOM_EPOCH_MS) << TIMESTAMP_SHIFT)
                | ((node_id.value() as i64) << NODE_ID_SHIFT)
                | (sequence & SEQUENCE_MASK),
        )
    }

    pub fn parts(&self) -> SnowflakeParts {
        SnowflakeParts {
            timestamp: (self.0 >> TIMESTAMP_SHIFT) + CUSTOM_EPOCH_MS,
            node_id: NodeId::new_unchecked(
                ((self.0 >> NODE_ID_SHIFT) & ((1 << NODE_ID_BITS) - 1)) as i32,
            ),
            sequence: (self.0 & SEQUENCE_MASK) as i32,
        }
    }
}

/// Outcome of one generation step at a given clock reading.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Ready(Snowflake),
    /// Sequence exhausted for this millisecond or clock slightly behind;
    /// try again once the clock moves.
    Wait,
}

/// Single-owner snowflake generator.
///
/// Holds the sequence state (`last_timestamp`, `sequence`) of exactly one
/// production loop, so it needs no atomics: every call takes `&mut self`.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    node_id: NodeId,
    last_timestamp: i64,
    sequence: i64,
}

impl SnowflakeGenerator {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            last_timestamp: -1,
            sequence: 0,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub(crate) fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(CUSTOM_EPOCH_MS)
    }

    pub(crate) fn step(&mut self, timestamp: i64) -> Result<Step, SnowflakeError> {
        if timestamp < self.last_timestamp {
            let drift_ms = self.last_timestamp - timestamp;
            if drift_ms > MAX_CLOCK_DRIFT_MS {
                return Err(SnowflakeError::ClockDriftExceeded {
                    drift_ms,
                    max_drift_ms: MAX_CLOCK_DRIFT_MS,
                });
            }
            if drift_ms > 100 {
                tracing::warn!(
                    drift_ms,
                    "snowflake: system clock jumped backward, waiting for clock to catch up"
                );
            }
            return Ok(Step::Wait);
        }

        if timestamp == self.last_timestamp {
            if self.sequence >= SEQUENCE_MASK {
                return Ok(Step::Wait);
            }
            self.sequence += 1;
        } else {
            self.last_timestamp = timestamp;
            self.sequence = 0;
        }

        Ok(Step::Ready(Snowflake::compose(
            timestamp,
            self.node_id,
            self.sequence,
        )))
    }

    /// Generate the next id, yielding to the runtime while the clock catches up.
    ///
    /// Returns `Err(SnowflakeError::ClockDriftExceeded)` if the system clock
    /// has jumped backward by more than 5 seconds.
    pub async fn next_id(&mut self) -> Result<Snowflake, SnowflakeError> {
        loop {
            match self.step(Self::current_timestamp())? {
                Step::Ready(id) => return Ok(id),
                Step::Wait => tokio::task::yield_now().await,
            }
        }
    }
}
