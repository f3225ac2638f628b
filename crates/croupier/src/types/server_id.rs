use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-wide identity assigned once at startup by the id allocator.
///
/// Backed by a row in the relational counter table. Never mutated for the
/// lifetime of the process.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ServerId(i64);

impl ServerId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Prefix of every lease token this server writes.
    pub fn owner_tag(&self) -> String {
        format!("server-{}", self.0)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
