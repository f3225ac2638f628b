use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::CoordinationError;
use crate::kv_store::KeyValueStore;
use crate::metrics::CoordinatorMetrics;
use crate::round_registry::{RoundEvent, RoundState};
use crate::types::{EventCommand, RoundNo};

/// Two-level cache of round state.
///
/// The local level is a per-process map swept after the quiescence window.
/// The shared level lives in the key-value store, written with the quiescence
/// window as TTL, so other servers can bind a round without the registry.
pub struct RoundCache {
    local: DashMap<RoundNo, CachedRound>,
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    quiescence: Duration,
    started: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<Arc<CoordinatorMetrics>>,
}

struct CachedRound {
    state: RoundState,
    touched: Instant,
}

impl RoundCache {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>, quiescence: Duration) -> Self {
        Self {
            local: DashMap::new(),
            store,
            prefix: prefix.into(),
            quiescence,
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

    pub(crate) fn round_key(&self, round_no: &RoundNo) -> String {
        format!("{}round:{}", self.prefix, round_no)
    }

    // Length-prefixed so a round number containing `:` cannot alias another
    // round's command slot.
    fn event_key(&self, round_no: &RoundNo, command: EventCommand) -> String {
        let round = round_no.as_ref();
        format!("{}event:{}:{round}:{command}", self.prefix, round.len())
    }

    pub fn get_local(&self, round_no: &RoundNo) -> Option<RoundState> {
        self.local.get(round_no).map(|entry| entry.state.clone())
    }

    /// Read the shared level. An undecodable entry is reported and treated
    /// as a miss so the caller falls through to the registry.
    pub async fn get_shared(&self, round_no: &RoundNo) -> Result<Option<RoundState>, CoordinationError> {
        let Some(bytes) = self.store.get(&self.round_key(round_no)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!(round_no = %round_no, error = %e, "ignoring undecodable cached round");
                Ok(None)
            }
        }
    }

    /// Local level first, then the shared level. A shared hit is copied locally.
    pub async fn lookup(&self, round_no: &RoundNo) -> Result<Option<RoundState>, CoordinationError> {
        if let Some(state) = self.get_local(round_no) {
            return Ok(Some(state));
        }
        let shared = self.get_shared(round_no).await?;
        if let Some(state) = &shared {
            self.put_local(state.clone());
        }
        Ok(shared)
    }

    pub fn put_local(&self, state: RoundState) {
        self.local.insert(
            state.round_no.clone(),
            CachedRound {
                state,
                touched: Instant::now(),
            },
        );
        self.update_gauge();
    }

    /// Write a round to both levels.
    pub async fn put(&self, state: &RoundState) -> Result<(), CoordinationError> {
        self.put_local(state.clone());
        let bytes = serde_json::to_vec(state)
            .map_err(|e| CoordinationError::serialization("failed to encode round state", e))?;
        self.store
            .set(&self.round_key(&state.round_no), &bytes, Some(self.quiescence))
            .await
    }

    /// Write the round together with the event that changed it.
    pub async fn put_snapshot(&self, state: &RoundState, event: &RoundEvent) -> Result<(), CoordinationError> {
        self.put(state).await?;
        let bytes = serde_json::to_vec(event)
            .map_err(|e| CoordinationError::serialization("failed to encode round event", e))?;
        self.store
            .set(
                &self.event_key(&event.round_no, event.command),
                &bytes,
                Some(self.quiescence),
            )
            .await
    }

    /// Last accepted event of `command` on `round_no`, if still cached.
    pub async fn get_event(
        &self,
        round_no: &RoundNo,
        command: EventCommand,
    ) -> Result<Option<RoundEvent>, CoordinationError> {
        match self.store.get(&self.event_key(round_no, command)).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CoordinationError::serialization("cached round event is unreadable", e)),
            None => Ok(None),
        }
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Drop local entries untouched for longer than the quiescence window.
    #[instrument(skip(self))]
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local
            .retain(|_, entry| now.duration_since(entry.touched) < self.quiescence);
        let evicted = before.saturating_sub(self.local.len());
        if evicted > 0 {
            debug!(evicted, "evicted quiescent rounds");
        }
        self.update_gauge();
        evicted
    }

    /// Spawn the sweep loop. Only the first call has an effect.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> bool {
        if self.cancel.is_cancelled() || self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        this.sweep();
                    }
                }
            }
        });
        *self.task.lock() = Some(handle);
        true
    }

    /// Stop the sweep loop. Idempotent.
    pub async fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "round cache sweeper ended abnormally");
            }
        }
    }

    fn update_gauge(&self) {
        if let Some(m) = &self.metrics {
            m.cached_rounds.set(self.local.len() as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_kv::MemoryKeyValueStore;
    use crate::types::RoomId;

    fn state(no: &str) -> RoundState {
        RoundState::bound(1, RoomId::new("room-1"), RoundNo::new(no))
    }

    fn cache(store: Arc<MemoryKeyValueStore>) -> RoundCache {
        RoundCache::new(store, "croupier:", Duration::from_secs(600))
    }

    #[tokio::test]
    async fn shared_hit_populates_local() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let writer = cache(store.clone());
        let reader = cache(store);
        writer.put(&state("R-1")).await.unwrap();

        assert!(reader.get_local(&RoundNo::new("R-1")).is_none());
        let found = reader.lookup(&RoundNo::new("R-1")).await.unwrap();
        assert_eq!(found, Some(state("R-1")));
        assert!(reader.get_local(&RoundNo::new("R-1")).is_some());
    }

    #[tokio::test]
    async fn undecodable_shared_entry_is_a_miss() {
        let store = Arc::new(MemoryKeyValueStore::new());
        store.set("croupier:round:R-1", b"{", None).await.unwrap();
        let c = cache(store);
        assert_eq!(c.lookup(&RoundNo::new("R-1")).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_quiescent_rounds() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let c = cache(store);
        c.put_local(state("R-1"));
        tokio::time::advance(Duration::from_secs(300)).await;
        c.put_local(state("R-2"));
        tokio::time::advance(Duration::from_secs(301)).await;

        assert_eq!(c.sweep(), 1);
        assert!(c.get_local(&RoundNo::new("R-1")).is_none());
        assert!(c.get_local(&RoundNo::new("R-2")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn shared_entries_expire_after_quiescence() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let c = cache(store.clone());
        c.put(&state("R-1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(c.get_shared(&RoundNo::new("R-1")).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_loop_stops_once() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let c = Arc::new(cache(store));
        c.put_local(state("R-1"));
        assert!(c.start_sweeper(Duration::from_secs(30)));
        assert!(!c.start_sweeper(Duration::from_secs(30)));
        tokio::time::sleep(Duration::from_secs(631)).await;
        assert_eq!(c.local_len(), 0);
        c.stop().await;
        c.stop().await;
    }

    #[test]
    fn event_keys_of_colon_rounds_stay_distinct() {
        let c = cache(Arc::new(MemoryKeyValueStore::new()));
        let a = c.event_key(&RoundNo::new("R:draw"), EventCommand::Pause);
        let b = c.event_key(&RoundNo::new("R"), EventCommand::Draw);
        assert_ne!(a, b);
        assert_eq!(
            c.event_key(&RoundNo::new("R-1"), EventCommand::Draw),
            "croupier:event:3:R-1:draw"
        );
    }
}
