use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::CoordinationError;
use crate::round_registry::{CloseOutcome, RoundRegistry, RoundState};
use crate::types::{RoomId, RoundNo};

/// In-memory round registry for testing.
///
/// Counts creations and closures so tests can assert that fleet-wide guards
/// kept the registry from seeing duplicate work.
pub struct MemoryRoundRegistry {
    inner: Mutex<Inner>,
}

struct Inner {
    rounds: HashMap<RoundNo, Record>,
    next_round_id: i64,
    created: u64,
    closed: u64,
    resolve_calls: u64,
    failing: bool,
}

struct Record {
    state: RoundState,
    closed: bool,
}

impl MemoryRoundRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                rounds: HashMap::new(),
                next_round_id: 1,
                created: 0,
                closed: 0,
                resolve_calls: 0,
                failing: false,
            }),
        }
    }

    /// Make every call fail with a registry error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    /// Rounds created since construction.
    pub fn created_count(&self) -> u64 {
        self.inner.lock().created
    }

    /// Rounds newly closed since construction (already-closed not counted).
    pub fn closed_count(&self) -> u64 {
        self.inner.lock().closed
    }

    /// Calls to `resolve_or_create_round`, including ones that found an existing round.
    pub fn resolve_calls(&self) -> u64 {
        self.inner.lock().resolve_calls
    }

    pub fn is_closed(&self, round_no: &RoundNo) -> bool {
        self.inner
            .lock()
            .rounds
            .get(round_no)
            .is_some_and(|r| r.closed)
    }

    pub fn contains(&self, round_no: &RoundNo) -> bool {
        self.inner.lock().rounds.contains_key(round_no)
    }

    fn check(inner: &Inner) -> Result<(), CoordinationError> {
        if inner.failing {
            return Err(CoordinationError::Registry {
                reason: "memory registry marked failing".to_string(),
                source: None,
            });
        }
        Ok(())
    }
}

impl Default for MemoryRoundRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoundRegistry for MemoryRoundRegistry {
    async fn resolve_or_create_round(
        &self,
        round_no: &RoundNo,
        room_id: &RoomId,
    ) -> Result<RoundState, CoordinationError> {
        let mut inner = self.inner.lock();
        Self::check(&inner)?;
        inner.resolve_calls += 1;
        if let Some(record) = inner.rounds.get(round_no) {
            return Ok(record.state.clone());
        }
        let round_id = inner.next_round_id;
        inner.next_round_id += 1;
        inner.created += 1;
        let state = RoundState::bound(round_id, room_id.clone(), round_no.clone());
        inner.rounds.insert(
            round_no.clone(),
            Record {
                state: state.clone(),
                closed: false,
            },
        );
        Ok(state)
    }

    async fn close_round(
        &self,
        round_no: &RoundNo,
        room_id: &RoomId,
    ) -> Result<CloseOutcome, CoordinationError> {
        let mut inner = self.inner.lock();
        Self::check(&inner)?;
        if !inner.rounds.contains_key(round_no) {
            // Closing a round never resolved here still records it.
            let round_id = inner.next_round_id;
            inner.next_round_id += 1;
            inner.rounds.insert(
                round_no.clone(),
                Record {
                    state: RoundState::bound(round_id, room_id.clone(), round_no.clone()),
                    closed: false,
                },
            );
        }
        let Some(record) = inner.rounds.get_mut(round_no) else {
            return Ok(CloseOutcome::AlreadyClosed);
        };
        if record.closed {
            return Ok(CloseOutcome::AlreadyClosed);
        }
        record.closed = true;
        inner.closed += 1;
        Ok(CloseOutcome::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let registry = MemoryRoundRegistry::new();
        let room = RoomId::new("room-1");
        let a = registry
            .resolve_or_create_round(&RoundNo::new("R-1"), &room)
            .await
            .unwrap();
        let b = registry
            .resolve_or_create_round(&RoundNo::new("R-1"), &room)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.created_count(), 1);
        assert_eq!(registry.resolve_calls(), 2);
    }

    #[tokio::test]
    async fn close_twice_reports_already_closed() {
        let registry = MemoryRoundRegistry::new();
        let room = RoomId::new("room-1");
        let no = RoundNo::new("R-1");
        registry.resolve_or_create_round(&no, &room).await.unwrap();
        assert_eq!(
            registry.close_round(&no, &room).await.unwrap(),
            CloseOutcome::Closed
        );
        assert_eq!(
            registry.close_round(&no, &room).await.unwrap(),
            CloseOutcome::AlreadyClosed
        );
        assert_eq!(registry.closed_count(), 1);
        assert!(registry.is_closed(&no));
    }

    #[tokio::test]
    async fn failing_registry_errors() {
        let registry = MemoryRoundRegistry::new();
        registry.set_failing(true);
        let err = registry
            .resolve_or_create_round(&RoundNo::new("R-1"), &RoomId::new("room-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::Registry { .. }));
    }
}
