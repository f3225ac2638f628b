//! Pre-generated snowflake ids.
//!
//! One production loop per process fills a bounded queue; consumers take ids
//! from it. Without a server identity the generator runs degraded and hands
//! out wall-clock seconds instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::CoordinatorMetrics;
use crate::snowflake::SnowflakeGenerator;
use crate::types::{NodeId, ServerId};

/// Pause after a clock drift error before the loop tries again.
const DRIFT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct SequenceGenerator {
    /// Taken by the first `start`; a second start finds `None`.
    sender: Mutex<Option<mpsc::Sender<i64>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<i64>>,
    started: AtomicBool,
    degraded: AtomicBool,
    stopped: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<Arc<CoordinatorMetrics>>,
}

impl SequenceGenerator {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            started: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start the production loop for this server.
    ///
    /// `None` puts the generator in degraded mode. Only the first call has an
    /// effect; returns whether this call started the generator.
    pub fn start(&self, server_id: Option<ServerId>) -> bool {
        let Some(tx) = self.sender.lock().take() else {
            return false;
        };
        if self.cancel.is_cancelled() {
            return false;
        }

        let Some(server_id) = server_id else {
            tracing::warn!("sequence generator started without a server identity, ids degrade to wall-clock seconds");
            self.degraded.store(true, Ordering::Release);
            self.started.store(true, Ordering::Release);
            return true;
        };

        let node_id = NodeId::from(server_id);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(produce(SnowflakeGenerator::new(node_id), tx, cancel));
        *self.task.lock() = Some(handle);
        self.started.store(true, Ordering::Release);
        tracing::info!(server_id = %server_id, node_id = %node_id, "sequence generator started");
        true
    }

    /// Next id. Waits while the queue is empty.
    ///
    /// Falls back to the current wall-clock second when the generator is
    /// degraded, not started, or stopped.
    pub async fn next(&self) -> i64 {
        if !self.is_producing() {
            return self.fallback();
        }
        let mut rx = self.receiver.lock().await;
        tokio::select! {
            biased;
            id = rx.recv() => match id {
                Some(id) => id,
                None => self.fallback(),
            },
            _ = self.cancel.cancelled() => self.fallback(),
        }
    }

    /// Order number of the form `{prefix}{id}`.
    pub async fn next_order_no(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.next().await)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Stop the production loop. Idempotent; pending `next` calls fall back
    /// to wall-clock ids.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "sequence production loop ended abnormally");
            }
        }
        self.receiver.lock().await.close();
        tracing::info!("sequence generator stopped");
    }

    fn is_producing(&self) -> bool {
        self.started.load(Ordering::Acquire)
            && !self.is_degraded()
            && !self.cancel.is_cancelled()
    }

    fn fallback(&self) -> i64 {
        if let Some(m) = &self.metrics {
            m.degraded_ids.inc();
        }
        Utc::now().timestamp()
    }
}

async fn produce(
    mut generator: SnowflakeGenerator,
    tx: mpsc::Sender<i64>,
    cancel: CancellationToken,
) {
    loop {
        let id = tokio::select! {
            _ = cancel.cancelled() => break,
            id = generator.next_id() => id,
        };
        match id {
            Ok(id) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(id.0) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "snowflake generation failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(DRIFT_RETRY_DELAY) => {}
                }
            }
        }
    }
    tracing::debug!("sequence production loop exited");
}
