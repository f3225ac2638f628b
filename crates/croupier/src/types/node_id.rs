use serde::{Deserialize, Serialize};
use std::fmt;

use super::ServerId;

/// Maximum valid node ID value (10-bit field: 0-1023).
pub const MAX_NODE_ID: i32 = (1 << 10) - 1; // 1023

/// Node identifier embedded in every snowflake id (10-bit field, valid range 0-1023).
///
/// Derived from the process [`ServerId`]. Values > 1023 would overflow into the
/// sequence field and collide with other nodes, so construction either
/// validates or wraps.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeId(i32);

impl NodeId {
    pub fn value(&self) -> i32 {
        self.0
    }

    /// Only for values that are already masked (snowflake decomposition).
    pub(crate) fn new_unchecked(id: i32) -> Self {
        Self(id)
    }

    /// Returns `Err` if the value is outside `0..=1023`.
    pub fn validated(id: i32) -> Result<Self, NodeIdError> {
        if !(0..=MAX_NODE_ID).contains(&id) {
            Err(NodeIdError { value: id as i64 })
        } else {
            Ok(Self(id))
        }
    }

    /// Wrap the value modulo 1024.
    ///
    /// Server ids come from an ever-growing counter table, so they exceed 1023
    /// after enough restarts. Two live servers collide only if their ids are
    /// exactly 1024 apart.
    pub fn wrapping(id: i64) -> Self {
        Self(id.rem_euclid(MAX_NODE_ID as i64 + 1) as i32)
    }
}

impl From<ServerId> for NodeId {
    fn from(server: ServerId) -> Self {
        Self::wrapping(server.value())
    }
}

/// Error returned when a node ID is outside the valid range 0-1023.
#[derive(Debug, Clone, thiserror::Error)]
#[error("node ID {value} is out of range (valid: 0..=1023)")]
pub struct NodeIdError {
    pub value: i64,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
