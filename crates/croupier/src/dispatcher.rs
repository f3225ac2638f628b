//! Exactly-once dispatch of round lifecycle events.
//!
//! Per round the dispatcher moves through `Unknown → Bound → EventReceived →
//! Notified`:
//!
//! 1. **Bind**: find the round in the local cache, then the shared cache, then
//!    the registry. Registry creation is guarded by a lock on the round number;
//!    servers that lose it poll the shared cache a bounded number of times.
//! 2. **Dedup**: take the lease on the event's dedup key. Losing it means the
//!    event is a duplicate and is dropped. The lease is never released; it
//!    expires on its own so retransmits inside the TTL stay duplicates.
//! 3. **Notify**: write the round snapshot and fan out to listeners. Listener
//!    failures are counted but nothing is rolled back.
//!
//! A `draw` also closes the round and pre-creates the next one.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::CoordinatorConfig;
use crate::error::CoordinationError;
use crate::kv_store::KeyValueStore;
use crate::listener::{ListenerRegistry, Notification, NotifyReport};
use crate::lock::{DistributedLock, LockLease};
use crate::metrics::CoordinatorMetrics;
use crate::round_cache::RoundCache;
use crate::round_registry::{CloseOutcome, RoundEvent, RoundRegistry, RoundState};
use crate::types::{EventCommand, RoomId, RoundNo, ServerId};

/// Result of dispatching one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// This server won the event and notified listeners.
    Accepted {
        round: RoundState,
        report: NotifyReport,
    },
    /// The event was already handled (here or elsewhere) within the lock TTL.
    Duplicate,
}

impl DispatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchOutcome::Accepted { .. })
    }
}

pub struct RoundEventDispatcher {
    lock: DistributedLock,
    cache: Arc<RoundCache>,
    registry: Arc<dyn RoundRegistry>,
    listeners: Arc<ListenerRegistry>,
    config: CoordinatorConfig,
    metrics: Arc<CoordinatorMetrics>,
}

impl RoundEventDispatcher {
    pub fn new(
        server_id: ServerId,
        store: Arc<dyn KeyValueStore>,
        cache: Arc<RoundCache>,
        registry: Arc<dyn RoundRegistry>,
        listeners: Arc<ListenerRegistry>,
        config: CoordinatorConfig,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            lock: DistributedLock::new(store, server_id, config.lock_poll_interval),
            cache,
            registry,
            listeners,
            config,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<RoundCache> {
        &self.cache
    }

    /// Handle one delivery of `event`.
    ///
    /// Errors mean the event was not accepted and may be redelivered; bind
    /// failures happen before the dedup lease is taken.
    #[instrument(skip(self, event), fields(round_no = %event.round_no, command = %event.command, request_id = %event.request_id))]
    pub async fn dispatch(&self, event: RoundEvent) -> Result<DispatchOutcome, CoordinationError> {
        let mut round = self.bind(&event.round_no, &event.room_id).await?;

        let dedup_key = event.dedup_key().storage_key(&self.config.key_prefix);
        if !self
            .lock
            .try_acquire(&dedup_key, self.config.event_lock_ttl)
            .await?
        {
            self.metrics.events_duplicate.inc();
            debug!("duplicate delivery discarded");
            return Ok(DispatchOutcome::Duplicate);
        }
        self.metrics.events_accepted.inc();

        round.apply(&event);
        if let Err(e) = self.cache.put_snapshot(&round, &event).await {
            warn!(error = %e, "failed to write round snapshot");
        }

        let report = self
            .listeners
            .notify(&Notification::Event {
                event: event.clone(),
                round: round.clone(),
            })
            .await;

        if event.command == EventCommand::Draw {
            self.settle(&round, event.next_round_no.as_ref()).await;
        }

        Ok(DispatchOutcome::Accepted { round, report })
    }

    /// Close the drawn round, then pre-create the next one. The event is
    /// already accepted at this point, so failures are logged rather than
    /// returned.
    async fn settle(&self, round: &RoundState, next_round_no: Option<&RoundNo>) {
        if let Err(e) = self.close_bound(round).await {
            warn!(error = %e, "failed to close drawn round");
        }
        if let Some(next) = next_round_no {
            match self.bind(next, &round.room_id).await {
                Ok(_) => debug!(next_round_no = %next, "next round prepared"),
                Err(e) => warn!(next_round_no = %next, error = %e, "failed to prepare next round"),
            }
        }
    }

    /// Close a round. Idempotent: listeners hear about a closure only from
    /// the call that actually closed it.
    pub async fn close_round(
        &self,
        round_no: &RoundNo,
        room_id: &RoomId,
    ) -> Result<CloseOutcome, CoordinationError> {
        let round = self.bind(round_no, room_id).await?;
        self.close_bound(&round).await
    }

    async fn close_bound(&self, round: &RoundState) -> Result<CloseOutcome, CoordinationError> {
        let outcome = self
            .registry
            .close_round(&round.round_no, &round.room_id)
            .await?;
        match outcome {
            CloseOutcome::Closed => {
                self.metrics.rounds_closed.inc();
                debug!(round_no = %round.round_no, "round closed");
                self.listeners
                    .notify(&Notification::RoundClosed {
                        round: round.clone(),
                    })
                    .await;
            }
            CloseOutcome::AlreadyClosed => {
                debug!(round_no = %round.round_no, "round already closed");
            }
        }
        Ok(outcome)
    }

    /// Resolve round metadata, creating the round through the registry if no
    /// cache level knows it.
    pub async fn bind(
        &self,
        round_no: &RoundNo,
        room_id: &RoomId,
    ) -> Result<RoundState, CoordinationError> {
        if let Some(state) = self.cache.lookup(round_no).await? {
            return Ok(state);
        }

        let create_key = self.config.key(&format!("lock:round:{round_no}"));
        let max_attempts = self.config.round_bind_max_attempts;

        for attempt in 1..=max_attempts {
            if let Some(lease) = self
                .lock
                .try_lease(&create_key, self.config.round_create_lock_ttl)
                .await?
            {
                return self.create_round(round_no, room_id, &lease).await;
            }

            debug!(round_no = %round_no, attempt, "round creation in progress elsewhere, polling");
            tokio::time::sleep(self.config.round_bind_backoff).await;

            if let Some(state) = self.cache.get_shared(round_no).await? {
                self.cache.put_local(state.clone());
                return Ok(state);
            }
        }

        warn!(round_no = %round_no, attempts = max_attempts, "round bind timed out");
        Err(CoordinationError::RoundBindTimeout {
            round_no: round_no.clone(),
            attempts: max_attempts,
        })
    }

    async fn create_round(
        &self,
        round_no: &RoundNo,
        room_id: &RoomId,
        lease: &LockLease,
    ) -> Result<RoundState, CoordinationError> {
        let result = self.registry.resolve_or_create_round(round_no, room_id).await;

        if let Ok(state) = &result {
            self.metrics.rounds_created.inc();
            if let Err(e) = self.cache.put(state).await {
                warn!(round_no = %round_no, error = %e, "failed to cache created round");
            }
        }

        // The registry is idempotent, so the next contender may retry
        // immediately instead of waiting out the TTL.
        if let Err(e) = self.lock.release(lease).await {
            debug!(round_no = %round_no, error = %e, "round creation lock release failed");
        }

        result
    }
}
