use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoordinationError;

/// Shared key-value store used for locks, the heartbeat map and the round cache.
///
/// Every server in the fleet talks to the same store. The only atomic primitives
/// the coordination layer relies on are `set_if_absent` and `delete_if_equals`;
/// everything else is plain reads and overwrites.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write `value` under `key` only if the key is absent (or expired).
    /// The key expires after `ttl`. Returns `true` if this call created it.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, CoordinationError>;

    /// Read a key. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationError>;

    /// Unconditionally overwrite a key, optionally with an expiry.
    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CoordinationError>;

    /// Delete `key` only if its current value equals `expected`.
    /// Returns `true` if a key was deleted.
    async fn delete_if_equals(&self, key: &str, expected: &[u8])
        -> Result<bool, CoordinationError>;
}
