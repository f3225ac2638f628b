//! The per-process coordination aggregate.
//!
//! # Example
//!
//! ```ignore
//! let coordinator = Coordinator::start(config, kv, counter, registry).await?;
//! coordinator.register_listener(Arc::new(Settlement::new(db)));
//! let outcome = coordinator.dispatch(event).await?;
//! coordinator.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::counter_store::CounterStore;
use crate::dispatcher::{DispatchOutcome, RoundEventDispatcher};
use crate::error::CoordinationError;
use crate::heartbeat::HeartbeatRegistry;
use crate::id_allocator::IdAllocator;
use crate::kv_store::KeyValueStore;
use crate::listener::{ListenerRegistry, RoundListener};
use crate::lock::DistributedLock;
use crate::metrics::CoordinatorMetrics;
use crate::round_cache::RoundCache;
use crate::round_registry::{RoundEvent, RoundRegistry};
use crate::sequence::SequenceGenerator;
use crate::types::ServerId;

/// Owns this server's identity and every coordination component built on it.
///
/// Constructed once per process; consumers get `Arc`s to the parts they need.
pub struct Coordinator {
    server_id: ServerId,
    config: Arc<CoordinatorConfig>,
    sequence: Arc<SequenceGenerator>,
    heartbeat: Arc<HeartbeatRegistry>,
    cache: Arc<RoundCache>,
    listeners: Arc<ListenerRegistry>,
    dispatcher: Arc<RoundEventDispatcher>,
    lock: Arc<DistributedLock>,
    metrics: Arc<CoordinatorMetrics>,
    shut_down: AtomicBool,
}

impl Coordinator {
    /// Start with unregistered metrics.
    pub async fn start(
        config: CoordinatorConfig,
        kv: Arc<dyn KeyValueStore>,
        counter: Arc<dyn CounterStore>,
        registry: Arc<dyn RoundRegistry>,
    ) -> Result<Self, CoordinationError> {
        Self::start_with_metrics(
            config,
            kv,
            counter,
            registry,
            Arc::new(CoordinatorMetrics::unregistered()),
        )
        .await
    }

    /// Allocate an identity, then start the sequence generator, the heartbeat
    /// loop and the round cache sweeper.
    ///
    /// Allocation exhaustion is returned as is; nothing is started in that case.
    pub async fn start_with_metrics(
        config: CoordinatorConfig,
        kv: Arc<dyn KeyValueStore>,
        counter: Arc<dyn CounterStore>,
        registry: Arc<dyn RoundRegistry>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Result<Self, CoordinationError> {
        config.validate()?;

        let server_id = IdAllocator::new(
            counter,
            config.hostname.clone(),
            config.allocator_max_attempts,
            config.allocator_backoff,
        )
        .allocate()
        .await?;

        let sequence = Arc::new(
            SequenceGenerator::new(config.sequence_queue_capacity).with_metrics(metrics.clone()),
        );
        sequence.start(Some(server_id));

        let heartbeat = Arc::new(
            HeartbeatRegistry::new(kv.clone(), server_id, &config).with_metrics(metrics.clone()),
        );
        heartbeat.start(config.heartbeat_interval);

        let cache = Arc::new(
            RoundCache::new(kv.clone(), config.key_prefix.clone(), config.round_cache_quiescence)
                .with_metrics(metrics.clone()),
        );
        cache.start_sweeper(config.round_cache_sweep_interval);

        let listeners = Arc::new(ListenerRegistry::new().with_metrics(metrics.clone()));
        let dispatcher = Arc::new(RoundEventDispatcher::new(
            server_id,
            kv.clone(),
            cache.clone(),
            registry,
            listeners.clone(),
            config.clone(),
            metrics.clone(),
        ));
        let lock = Arc::new(DistributedLock::new(kv, server_id, config.lock_poll_interval));

        tracing::info!(server_id = %server_id, hostname = %config.hostname, "coordinator started");

        Ok(Self {
            server_id,
            config: Arc::new(config),
            sequence,
            heartbeat,
            cache,
            listeners,
            dispatcher,
            lock,
            metrics,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn config(&self) -> &Arc<CoordinatorConfig> {
        &self.config
    }

    pub fn sequence(&self) -> &Arc<SequenceGenerator> {
        &self.sequence
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatRegistry> {
        &self.heartbeat
    }

    pub fn dispatcher(&self) -> &Arc<RoundEventDispatcher> {
        &self.dispatcher
    }

    /// General-purpose lock owned by this server's identity.
    pub fn lock(&self) -> &Arc<DistributedLock> {
        &self.lock
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    pub fn register_listener(&self, listener: Arc<dyn RoundListener>) {
        self.listeners.register(listener);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Dispatch one inbound event. Refused once shutdown has begun.
    pub async fn dispatch(&self, event: RoundEvent) -> Result<DispatchOutcome, CoordinationError> {
        if self.is_shut_down() {
            return Err(CoordinationError::ShuttingDown);
        }
        self.dispatcher.dispatch(event).await
    }

    /// Stop all background loops. Only the first call does anything.
    ///
    /// Leases held by in-flight dispatches are left to expire.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(server_id = %self.server_id, "coordinator shutting down");
        self.heartbeat.stop().await;
        self.cache.stop().await;
        self.sequence.stop().await;
        tracing::info!(server_id = %self.server_id, "coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snowflake::Snowflake;
    use crate::storage::memory_counter::MemoryCounterStore;
    use crate::storage::memory_kv::MemoryKeyValueStore;
    use crate::storage::memory_rounds::MemoryRoundRegistry;
    use crate::types::{EventCommand, NodeId, RequestId, RoomId, RoundNo};
    use chrono::Utc;
    use std::time::Duration;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            hostname: "test-host".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_assigns_identity_and_generates_ids() {
        let counter = Arc::new(MemoryCounterStore::new());
        let coordinator = Coordinator::start(
            config(),
            Arc::new(MemoryKeyValueStore::new()),
            counter.clone(),
            Arc::new(MemoryRoundRegistry::new()),
        )
        .await
        .unwrap();

        assert_eq!(coordinator.server_id(), ServerId::new(1));
        let id = coordinator.sequence().next().await;
        assert_eq!(Snowflake(id).parts().node_id, NodeId::wrapping(1));
        assert_eq!(counter.rows()[0].hostname, "test-host");
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_allocation_fails_start() {
        let counter = Arc::new(MemoryCounterStore::new());
        counter.always_conflict();
        let result = Coordinator::start(
            CoordinatorConfig {
                allocator_max_attempts: 3,
                ..config()
            },
            Arc::new(MemoryKeyValueStore::new()),
            counter,
            Arc::new(MemoryRoundRegistry::new()),
        )
        .await;
        assert!(matches!(
            result,
            Err(CoordinationError::AllocationExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let result = Coordinator::start(
            CoordinatorConfig {
                heartbeat_interval: Duration::ZERO,
                ..config()
            },
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryCounterStore::new()),
            Arc::new(MemoryRoundRegistry::new()),
        )
        .await;
        assert!(matches!(result, Err(CoordinationError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn dispatch_refused_after_shutdown() {
        let coordinator = Coordinator::start(
            config(),
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryCounterStore::new()),
            Arc::new(MemoryRoundRegistry::new()),
        )
        .await
        .unwrap();
        coordinator.shutdown().await;
        coordinator.shutdown().await;
        assert!(coordinator.is_shut_down());

        let event = RoundEvent {
            room_id: RoomId::new("room-1"),
            round_no: RoundNo::new("R-1"),
            command: EventCommand::BetOpen,
            request_id: RequestId::new("REQ-1"),
            next_round_no: None,
            occurred_at: Utc::now(),
            payload: serde_json::Value::Null,
        };
        assert!(matches!(
            coordinator.dispatch(event).await,
            Err(CoordinationError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn heartbeat_runs_after_start() {
        let coordinator = Coordinator::start(
            config(),
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryCounterStore::new()),
            Arc::new(MemoryRoundRegistry::new()),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.heartbeat().approximate_cluster_size(), 1);
        coordinator.shutdown().await;
    }
}
