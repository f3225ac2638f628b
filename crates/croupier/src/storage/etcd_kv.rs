//! etcd-backed key-value store.
//!
//! Expiry is implemented with one lease per written key: the lease is granted
//! first, then attached to the put. Lock acquisition is a transaction on
//! `create_revision == 0`, so exactly one concurrent writer creates the key.
//!
//! This module is only available when the `etcd` feature is enabled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, PutOptions, Txn, TxnOp};
use tokio::sync::Mutex;

use crate::error::CoordinationError;
use crate::kv_store::KeyValueStore;

pub struct EtcdKeyValueStore {
    client: Arc<Mutex<Client>>,
}

impl EtcdKeyValueStore {
    pub fn new(client: Client) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
        }
    }

    fn map_err(e: etcd_client::Error) -> CoordinationError {
        CoordinationError::store(e.to_string(), e)
    }

    /// etcd lease TTLs are whole seconds; round up so a key never expires early.
    fn lease_seconds(ttl: Duration) -> i64 {
        let secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
        i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<i64, CoordinationError> {
        let mut client = self.client.lock().await;
        let lease = client
            .lease_grant(Self::lease_seconds(ttl), None)
            .await
            .map_err(Self::map_err)?;
        Ok(lease.id())
    }

    async fn revoke_lease(&self, lease_id: i64) {
        let mut client = self.client.lock().await;
        if let Err(e) = client.lease_revoke(lease_id).await {
            tracing::debug!(lease_id, error = %e, "lease revoke failed, lease will expire via TTL");
        }
    }
}

#[async_trait]
impl KeyValueStore for EtcdKeyValueStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let lease_id = self.grant_lease(ttl).await?;

        let txn = Txn::new()
            .when([Compare::create_revision(
                key.as_bytes(),
                CompareOp::Equal,
                0,
            )])
            .and_then([TxnOp::put(
                key.as_bytes(),
                value,
                Some(PutOptions::new().with_lease(lease_id)),
            )]);

        let result = {
            let mut client = self.client.lock().await;
            client.txn(txn).await
        };

        match result {
            Ok(resp) if resp.succeeded() => Ok(true),
            Ok(_) => {
                // Key already held; the lease we granted is unused.
                self.revoke_lease(lease_id).await;
                Ok(false)
            }
            Err(e) => {
                self.revoke_lease(lease_id).await;
                Err(Self::map_err(e))
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
        let mut client = self.client.lock().await;
        let resp = client
            .get(key.as_bytes(), None)
            .await
            .map_err(Self::map_err)?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CoordinationError> {
        let options = match ttl {
            Some(ttl) => Some(PutOptions::new().with_lease(self.grant_lease(ttl).await?)),
            None => None,
        };
        let mut client = self.client.lock().await;
        client
            .put(key.as_bytes(), value, options)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn delete_if_equals(
        &self,
        key: &str,
        expected: &[u8],
    ) -> Result<bool, CoordinationError> {
        let txn = Txn::new()
            .when([Compare::value(key.as_bytes(), CompareOp::Equal, expected)])
            .and_then([TxnOp::delete(key.as_bytes(), None)]);

        let mut client = self.client.lock().await;
        let resp = client.txn(txn).await.map_err(Self::map_err)?;
        Ok(resp.succeeded())
    }
}
