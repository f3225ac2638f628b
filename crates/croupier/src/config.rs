use crate::error::CoordinationError;
use std::time::Duration;

/// Configuration for one coordinator process.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Hostname recorded in the counter row for audit. Default: `$HOSTNAME` or "unknown".
    pub hostname: String,
    /// Namespace prefix for every key written to the shared store. Default: "croupier:".
    pub key_prefix: String,
    /// Read-increment-insert attempts before identity allocation fails. Default: 1000.
    pub allocator_max_attempts: u32,
    /// Fixed sleep between allocation attempts. Default: 10ms.
    pub allocator_backoff: Duration,
    /// Capacity of the pre-generated id queue. Default: 1024.
    pub sequence_queue_capacity: usize,
    /// How often this server publishes its heartbeat. Default: 5s.
    pub heartbeat_interval: Duration,
    /// Records not refreshed within this window are pruned. Default: 30s.
    pub heartbeat_expiry: Duration,
    /// TTL of the lock guarding the membership map. Default: 3s.
    pub heartbeat_lock_ttl: Duration,
    /// Cluster size reported before the first successful heartbeat cycle. Default: 3.
    pub default_cluster_size: usize,
    /// Lease held on a dedup key after an event is accepted. Retransmits
    /// inside this window are discarded. Default: 60s.
    pub event_lock_ttl: Duration,
    /// Lease guarding creation of a round in the registry. Default: 10s.
    pub round_create_lock_ttl: Duration,
    /// Shared-cache polls made by a server that lost the round creation lock. Default: 20.
    pub round_bind_max_attempts: u32,
    /// Sleep between those polls. Default: 50ms.
    pub round_bind_backoff: Duration,
    /// Cached round state older than this is stale and may be dropped. Default: 10min.
    pub round_cache_quiescence: Duration,
    /// How often the local round cache is swept. Default: 30s.
    pub round_cache_sweep_interval: Duration,
    /// Poll interval of the blocking lock acquire. Default: 50ms.
    pub lock_poll_interval: Duration,
}

impl CoordinatorConfig {
    /// Validate configuration values.
    ///
    /// Besides non-zero checks, the heartbeat expiry must exceed the interval,
    /// otherwise every server would prune its peers between two beats.
    pub fn validate(&self) -> Result<(), CoordinationError> {
        if self.allocator_max_attempts == 0 {
            return Err(CoordinationError::InvalidConfig {
                reason: "allocator_max_attempts must be >= 1".to_string(),
            });
        }
        if self.sequence_queue_capacity == 0 {
            return Err(CoordinationError::InvalidConfig {
                reason: "sequence_queue_capacity must be >= 1".to_string(),
            });
        }
        if self.default_cluster_size == 0 {
            return Err(CoordinationError::InvalidConfig {
                reason: "default_cluster_size must be >= 1".to_string(),
            });
        }
        if self.round_bind_max_attempts == 0 {
            return Err(CoordinationError::InvalidConfig {
                reason: "round_bind_max_attempts must be >= 1".to_string(),
            });
        }
        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("heartbeat_expiry", self.heartbeat_expiry),
            ("heartbeat_lock_ttl", self.heartbeat_lock_ttl),
            ("event_lock_ttl", self.event_lock_ttl),
            ("round_create_lock_ttl", self.round_create_lock_ttl),
            ("round_cache_quiescence", self.round_cache_quiescence),
            ("round_cache_sweep_interval", self.round_cache_sweep_interval),
            ("lock_poll_interval", self.lock_poll_interval),
        ] {
            if value.is_zero() {
                return Err(CoordinationError::InvalidConfig {
                    reason: format!("{name} must be > 0"),
                });
            }
        }
        if self.heartbeat_expiry <= self.heartbeat_interval {
            return Err(CoordinationError::InvalidConfig {
                reason: format!(
                    "heartbeat_expiry ({:?}) must be greater than heartbeat_interval ({:?})",
                    self.heartbeat_expiry, self.heartbeat_interval
                ),
            });
        }
        if self.key_prefix.is_empty() {
            return Err(CoordinationError::InvalidConfig {
                reason: "key_prefix must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.key_prefix, suffix)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            key_prefix: "croupier:".to_string(),
            allocator_max_attempts: 1000,
            allocator_backoff: Duration::from_millis(10),
            sequence_queue_capacity: 1024,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_expiry: Duration::from_secs(30),
            heartbeat_lock_ttl: Duration::from_secs(3),
            default_cluster_size: 3,
            event_lock_ttl: Duration::from_secs(60),
            round_create_lock_ttl: Duration::from_secs(10),
            round_bind_max_attempts: 20,
            round_bind_backoff: Duration::from_millis(50),
            round_cache_quiescence: Duration::from_secs(600),
            round_cache_sweep_interval: Duration::from_secs(30),
            lock_poll_interval: Duration::from_millis(50),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.allocator_max_attempts, 1000);
        assert_eq!(config.allocator_backoff, Duration::from_millis(10));
        assert_eq!(config.default_cluster_size, 3);
        assert_eq!(config.key_prefix, "croupier:");
        assert_eq!(config.heartbeat_expiry, Duration::from_secs(30));
    }

    #[test]
    fn default_config_is_valid() {
        CoordinatorConfig::default().validate().unwrap();
    }

    #[test]
    fn validate_zero_attempts() {
        let config = CoordinatorConfig {
            allocator_max_attempts: 0,
            ..Default::default()
        };
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("allocator_max_attempts"), "got: {msg}");
    }

    #[test]
    fn validate_zero_duration() {
        let config = CoordinatorConfig {
            event_lock_ttl: Duration::ZERO,
            ..Default::default()
        };
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("event_lock_ttl"), "got: {msg}");
    }

    #[test]
    fn validate_expiry_not_above_interval() {
        let config = CoordinatorConfig {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_expiry: Duration::from_secs(30),
            ..Default::default()
        };
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("heartbeat_expiry"), "got: {msg}");
    }

    #[test]
    fn key_uses_prefix() {
        let config = CoordinatorConfig {
            key_prefix: "test:".into(),
            ..Default::default()
        };
        assert_eq!(config.key("heartbeats"), "test:heartbeats");
    }
}
