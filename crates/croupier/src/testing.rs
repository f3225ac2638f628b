//! In-memory test fleet for unit and integration testing.
//!
//! Several coordinators share one in-memory key-value store, counter table and
//! round registry, the way a real fleet shares etcd and Postgres.

use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::coordinator::Coordinator;
use crate::listener::RoundListener;
use crate::storage::memory_counter::MemoryCounterStore;
use crate::storage::memory_kv::MemoryKeyValueStore;
use crate::storage::memory_rounds::MemoryRoundRegistry;

/// A fleet of coordinators with distinct identities over shared in-memory stores.
///
/// # Example
///
/// ```ignore
/// let fleet = TestFleet::new(3).await;
/// fleet.register_listener(recorder.clone());
/// for node in fleet.nodes() {
///     node.dispatch(event.clone()).await?;
/// }
/// fleet.shutdown().await;
/// ```
pub struct TestFleet {
    nodes: Vec<Coordinator>,
    kv: Arc<MemoryKeyValueStore>,
    counter: Arc<MemoryCounterStore>,
    registry: Arc<MemoryRoundRegistry>,
}

impl TestFleet {
    /// Start `size` coordinators with default configuration.
    pub async fn new(size: usize) -> Self {
        Self::with_config(size, CoordinatorConfig::default()).await
    }

    /// Start `size` coordinators sharing the given configuration.
    pub async fn with_config(size: usize, config: CoordinatorConfig) -> Self {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let counter = Arc::new(MemoryCounterStore::new());
        let registry = Arc::new(MemoryRoundRegistry::new());

        let mut nodes = Vec::with_capacity(size);
        for i in 0..size {
            let node_config = CoordinatorConfig {
                hostname: format!("test-node-{i}"),
                ..config.clone()
            };
            let node = Coordinator::start(node_config, kv.clone(), counter.clone(), registry.clone())
                .await
                .expect("TestFleet config should be valid");
            nodes.push(node);
        }

        Self {
            nodes,
            kv,
            counter,
            registry,
        }
    }

    pub fn nodes(&self) -> &[Coordinator] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &Coordinator {
        &self.nodes[index]
    }

    pub fn kv(&self) -> &Arc<MemoryKeyValueStore> {
        &self.kv
    }

    pub fn counter(&self) -> &Arc<MemoryCounterStore> {
        &self.counter
    }

    pub fn registry(&self) -> &Arc<MemoryRoundRegistry> {
        &self.registry
    }

    /// Register one listener on every node.
    pub fn register_listener(&self, listener: Arc<dyn RoundListener>) {
        for node in &self.nodes {
            node.register_listener(listener.clone());
        }
    }

    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}
