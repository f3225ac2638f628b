use std::fmt;

use super::{EventCommand, RequestId, RoundNo};

/// Lock key enforcing exactly-once handling of one `(round, command, request)`.
///
/// Never persisted as an entity; it only exists as the key of a lease in the
/// shared store. Both ids come from upstream and may contain `:`, so each is
/// written with its byte length in front; distinct tuples never share a key.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct DedupKey {
    pub round_no: RoundNo,
    pub command: EventCommand,
    pub request_id: RequestId,
}

impl DedupKey {
    pub fn new(round_no: RoundNo, command: EventCommand, request_id: RequestId) -> Self {
        Self {
            round_no,
            command,
            request_id,
        }
    }

    /// Full store key under the given namespace prefix.
    pub fn storage_key(&self, prefix: &str) -> String {
        format!("{prefix}dedup:{self}")
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let round = self.round_no.as_ref();
        let request = self.request_id.as_ref();
        write!(
            f,
            "{}:{round}:{}:{}:{request}",
            round.len(),
            self.command,
            request.len()
        )
    }
}
