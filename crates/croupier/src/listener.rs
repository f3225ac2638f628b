use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::CoordinationError;
use crate::metrics::CoordinatorMetrics;
use crate::round_registry::{RoundEvent, RoundState};

/// What listeners are told about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// An event won its dedup lock. Delivered once per event fleet-wide.
    Event { event: RoundEvent, round: RoundState },
    /// A round was newly closed by this server.
    RoundClosed { round: RoundState },
}

impl Notification {
    pub fn round(&self) -> &RoundState {
        match self {
            Notification::Event { round, .. } | Notification::RoundClosed { round } => round,
        }
    }
}

/// Downstream consumer of accepted round events (settlement, broadcasting, …).
#[async_trait]
pub trait RoundListener: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    async fn on_notification(&self, notification: &Notification) -> Result<(), CoordinationError>;
}

/// Per-notification delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fan-out to every registered listener.
///
/// Listeners run concurrently. A failing listener is logged and counted; it
/// neither stops the others nor causes a redelivery.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn RoundListener>>>,
    metrics: Option<Arc<CoordinatorMetrics>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn register(&self, listener: Arc<dyn RoundListener>) {
        tracing::debug!(listener = listener.name(), "listener registered");
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn notify(&self, notification: &Notification) -> NotifyReport {
        let listeners = self.listeners.read().clone();
        let results = futures::future::join_all(
            listeners
                .iter()
                .map(|listener| listener.on_notification(notification)),
        )
        .await;

        let mut report = NotifyReport::default();
        for (listener, result) in listeners.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    if let Some(m) = &self.metrics {
                        m.listener_failures.inc();
                    }
                    tracing::warn!(
                        listener = listener.name(),
                        round_no = %notification.round().round_no,
                        error = %e,
                        "listener failed"
                    );
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RoomId, RoundNo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RoundListener for Counting {
        fn name(&self) -> &str {
            if self.fail {
                "failing"
            } else {
                "counting"
            }
        }

        async fn on_notification(&self, _n: &Notification) -> Result<(), CoordinationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoordinationError::Listener {
                    listener: self.name().to_string(),
                    reason: "boom".into(),
                });
            }
            Ok(())
        }
    }

    fn closed() -> Notification {
        Notification::RoundClosed {
            round: RoundState::bound(1, RoomId::new("room-1"), RoundNo::new("R-1")),
        }
    }

    #[tokio::test]
    async fn failures_do_not_stop_fan_out() {
        let metrics = Arc::new(CoordinatorMetrics::unregistered());
        let registry = ListenerRegistry::new().with_metrics(metrics.clone());
        let ok = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let bad = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        registry.register(bad.clone());
        registry.register(ok.clone());

        let report = registry.notify(&closed()).await;
        assert_eq!(report, NotifyReport { delivered: 1, failed: 1 });
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.listener_failures.get(), 1);
    }

    #[tokio::test]
    async fn empty_registry_reports_nothing() {
        let registry = ListenerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.notify(&closed()).await, NotifyReport::default());
    }
}
