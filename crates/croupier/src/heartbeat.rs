//! Heartbeat-based membership estimation.
//!
//! All servers share one map value `{server_id: last_seen}` in the key-value
//! store. Each cycle a server takes the membership lock, refreshes its own
//! record, prunes records older than the expiry, and writes the map back.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::CoordinatorConfig;
use crate::error::CoordinationError;
use crate::kv_store::KeyValueStore;
use crate::lock::DistributedLock;
use crate::metrics::CoordinatorMetrics;
use crate::types::ServerId;

/// Stored membership map: server id → last heartbeat.
pub type MembershipMap = BTreeMap<String, DateTime<Utc>>;

/// Result of one heartbeat cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Map rewritten; `live` records remain after pruning.
    Completed { live: usize, pruned: usize },
    /// Another server held the membership lock.
    Skipped,
}

pub struct HeartbeatRegistry {
    store: Arc<dyn KeyValueStore>,
    lock: DistributedLock,
    server_id: ServerId,
    map_key: String,
    lock_key: String,
    expiry: Duration,
    lock_ttl: Duration,
    default_size: usize,
    cluster_size: AtomicUsize,
    observed: AtomicBool,
    started: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<Arc<CoordinatorMetrics>>,
}

impl HeartbeatRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, server_id: ServerId, config: &CoordinatorConfig) -> Self {
        Self {
            lock: DistributedLock::new(store.clone(), server_id, config.lock_poll_interval),
            store,
            server_id,
            map_key: config.key("heartbeats"),
            lock_key: config.key("lock:heartbeats"),
            expiry: config.heartbeat_expiry,
            lock_ttl: config.heartbeat_lock_ttl,
            default_size: config.default_cluster_size.max(1),
            cluster_size: AtomicUsize::new(0),
            observed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawn the periodic heartbeat loop. The first cycle runs immediately.
    /// Returns `false` if the loop was already started or stopped.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        if self.cancel.is_cancelled() || self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(interval).await });
        *self.task.lock() = Some(handle);
        tracing::info!(server_id = %self.server_id, ?interval, "heartbeat loop started");
        true
    }

    async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::warn!(error = %e, "heartbeat cycle aborted");
                    }
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleOutcome, CoordinationError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One heartbeat cycle as of `now`.
    ///
    /// A read or decode failure aborts the cycle before anything is written,
    /// so a corrupt map is never overwritten with a partial view.
    #[instrument(skip(self), fields(server_id = %self.server_id))]
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleOutcome, CoordinationError> {
        let Some(lease) = self.lock.try_lease(&self.lock_key, self.lock_ttl).await? else {
            tracing::debug!("membership lock busy, skipping cycle");
            return Ok(CycleOutcome::Skipped);
        };

        let result = self.refresh_map(now).await;

        if let Err(e) = self.lock.release(&lease).await {
            tracing::debug!(error = %e, "membership lock release failed, lock will expire");
        }

        let outcome = result?;
        if let CycleOutcome::Completed { live, pruned } = outcome {
            let size = live.max(1);
            self.cluster_size.store(size, Ordering::Release);
            self.observed.store(true, Ordering::Release);
            if let Some(m) = &self.metrics {
                m.cluster_size.set(size as i64);
            }
            if pruned > 0 {
                tracing::info!(pruned, live, "pruned expired heartbeat records");
            }
        }
        Ok(outcome)
    }

    async fn refresh_map(&self, now: DateTime<Utc>) -> Result<CycleOutcome, CoordinationError> {
        let mut map: MembershipMap = match self.store.get(&self.map_key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CoordinationError::serialization("membership map is unreadable", e))?,
            None => MembershipMap::new(),
        };

        map.insert(self.server_id.to_string(), now);

        // Out-of-range expiry saturates to "never expire".
        let expiry = chrono::Duration::from_std(self.expiry).unwrap_or(chrono::Duration::MAX);
        let before = map.len();
        map.retain(|_, last_seen| now.signed_duration_since(*last_seen) <= expiry);
        let pruned = before - map.len();

        let bytes = serde_json::to_vec(&map)
            .map_err(|e| CoordinationError::serialization("failed to encode membership map", e))?;
        self.store.set(&self.map_key, &bytes, None).await?;

        Ok(CycleOutcome::Completed {
            live: map.len(),
            pruned,
        })
    }

    /// Number of live servers seen by the last successful cycle, or the
    /// configured default before any cycle completed. Never less than 1.
    pub fn approximate_cluster_size(&self) -> usize {
        if self.observed.load(Ordering::Acquire) {
            self.cluster_size.load(Ordering::Acquire).max(1)
        } else {
            self.default_size
        }
    }

    /// This server's share of a fleet-wide limit: `ceil(total / cluster_size)`.
    /// A non-zero total never scales below 1.
    pub fn scaled_share(&self, total: u64) -> u64 {
        if total == 0 {
            return 0;
        }
        let size = self.approximate_cluster_size() as u64;
        total.div_ceil(size).max(1)
    }

    /// Stop the heartbeat loop. Idempotent. The local record is left to expire.
    pub async fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "heartbeat loop ended abnormally");
            }
        }
        tracing::info!(server_id = %self.server_id, "heartbeat loop stopped");
    }
}
