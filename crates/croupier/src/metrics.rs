use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Coordination-layer prometheus metrics.
pub struct CoordinatorMetrics {
    /// Events that won their dedup lock and were dispatched.
    pub events_accepted: IntCounter,
    /// Deliveries discarded because the dedup lock was already held.
    pub events_duplicate: IntCounter,
    /// Listener invocations that returned an error.
    pub listener_failures: IntCounter,
    /// Round bindings this server resolved through the registry.
    pub rounds_created: IntCounter,
    /// Rounds this server closed (already-closed rounds not counted).
    pub rounds_closed: IntCounter,
    /// Ids handed out as wall-clock seconds instead of snowflakes.
    pub degraded_ids: IntCounter,
    /// Last observed number of live servers.
    pub cluster_size: IntGauge,
    /// Rounds held in the local cache.
    pub cached_rounds: IntGauge,
}

impl CoordinatorMetrics {
    /// Create metrics and register them with the given prometheus registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::build()?;
        registry.register(Box::new(metrics.events_accepted.clone()))?;
        registry.register(Box::new(metrics.events_duplicate.clone()))?;
        registry.register(Box::new(metrics.listener_failures.clone()))?;
        registry.register(Box::new(metrics.rounds_created.clone()))?;
        registry.register(Box::new(metrics.rounds_closed.clone()))?;
        registry.register(Box::new(metrics.degraded_ids.clone()))?;
        registry.register(Box::new(metrics.cluster_size.clone()))?;
        registry.register(Box::new(metrics.cached_rounds.clone()))?;
        Ok(metrics)
    }

    /// Create metrics without registering (for testing).
    pub fn unregistered() -> Self {
        Self::build().expect("valid metric names")
    }

    fn build() -> Result<Self, prometheus::Error> {
        Ok(Self {
            events_accepted: IntCounter::with_opts(Opts::new(
                "croupier_events_accepted_total",
                "Round events accepted for dispatch",
            ))?,
            events_duplicate: IntCounter::with_opts(Opts::new(
                "croupier_events_duplicate_total",
                "Round events discarded as duplicates",
            ))?,
            listener_failures: IntCounter::with_opts(Opts::new(
                "croupier_listener_failures_total",
                "Listener invocations that failed",
            ))?,
            rounds_created: IntCounter::with_opts(Opts::new(
                "croupier_rounds_created_total",
                "Round bindings resolved through the registry",
            ))?,
            rounds_closed: IntCounter::with_opts(Opts::new(
                "croupier_rounds_closed_total",
                "Rounds closed by this server",
            ))?,
            degraded_ids: IntCounter::with_opts(Opts::new(
                "croupier_degraded_ids_total",
                "Ids issued as wall-clock seconds",
            ))?,
            cluster_size: IntGauge::with_opts(Opts::new(
                "croupier_cluster_size",
                "Approximate number of live servers",
            ))?,
            cached_rounds: IntGauge::with_opts(Opts::new(
                "croupier_cached_rounds",
                "Rounds held in the local cache",
            ))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_metrics_work() {
        let m = CoordinatorMetrics::unregistered();
        m.events_accepted.inc();
        m.cluster_size.set(4);
        assert_eq!(m.events_accepted.get(), 1);
        assert_eq!(m.cluster_size.get(), 4);
    }

    #[test]
    fn registered_metrics_are_gathered() {
        let r = Registry::new();
        let m = CoordinatorMetrics::new(&r).unwrap();
        m.events_duplicate.inc_by(2);
        let names: Vec<String> = r.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"croupier_events_duplicate_total".to_string()));
    }

    #[test]
    fn double_registration_fails() {
        let r = Registry::new();
        let _m = CoordinatorMetrics::new(&r).unwrap();
        assert!(CoordinatorMetrics::new(&r).is_err());
    }
}
