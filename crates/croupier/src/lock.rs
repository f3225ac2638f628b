use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::CoordinationError;
use crate::kv_store::KeyValueStore;
use crate::types::ServerId;

/// Process-wide acquire counter. Combined with the server's owner tag it
/// makes every stored lease value unique across the fleet.
static NEXT_LEASE: AtomicU64 = AtomicU64::new(1);

/// A lease held on one key. Dropping it does not release anything: the lease
/// ends when the store expires the key or when [`DistributedLock::release`]
/// deletes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub owner: ServerId,
    /// Value written under `key`; release compares against it.
    pub token: String,
    pub ttl: Duration,
    pub acquired_at: DateTime<Utc>,
}

/// Lease-based mutual exclusion over the shared key-value store.
///
/// Each acquire stores a fresh `server-{id}:{n}` token, so release only ever
/// deletes the exact lease it was given, even when a later lease on the same
/// key belongs to another task of this server. Not reentrant: a second
/// acquire of a held key by the same owner returns `false`.
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    owner: ServerId,
    poll_interval: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>, owner: ServerId, poll_interval: Duration) -> Self {
        Self {
            store,
            owner,
            poll_interval,
        }
    }

    fn next_token(&self) -> String {
        let n = NEXT_LEASE.fetch_add(1, Ordering::Relaxed);
        format!("{}:{n}", self.owner.owner_tag())
    }

    pub fn owner(&self) -> ServerId {
        self.owner
    }

    /// Try once to take the lease on `key`.
    pub async fn try_lease(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockLease>, CoordinationError> {
        let token = self.next_token();
        let acquired = self.store.set_if_absent(key, token.as_bytes(), ttl).await?;
        if !acquired {
            tracing::debug!(key, "lock held elsewhere");
            return Ok(None);
        }
        Ok(Some(LockLease {
            key: key.to_string(),
            owner: self.owner,
            token,
            ttl,
            acquired_at: Utc::now(),
        }))
    }

    /// Try once to take the lease on `key`; contention yields `Ok(false)`.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, CoordinationError> {
        Ok(self.try_lease(key, ttl).await?.is_some())
    }

    /// Poll for the lease until it is taken or `wait` has elapsed.
    ///
    /// Store errors abort the wait immediately.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        wait: Duration,
    ) -> Result<Option<LockLease>, CoordinationError> {
        // An unrepresentable deadline means wait indefinitely.
        let deadline = tokio::time::Instant::now().checked_add(wait);
        loop {
            if let Some(lease) = self.try_lease(key, ttl).await? {
                return Ok(Some(lease));
            }
            let now = tokio::time::Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => return Ok(None),
                Some(deadline) => self.poll_interval.min(deadline - now),
                None => self.poll_interval,
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Best-effort release. Deletes the key only while it still carries the
    /// lease's token; returns whether anything was deleted.
    pub async fn release(&self, lease: &LockLease) -> Result<bool, CoordinationError> {
        let released = self
            .store
            .delete_if_equals(&lease.key, lease.token.as_bytes())
            .await?;
        if !released {
            tracing::debug!(key = %lease.key, "release skipped, lease expired or replaced");
        }
        Ok(released)
    }
}
