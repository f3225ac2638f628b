use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::counter_store::{CounterRow, CounterStore, InsertOutcome};
use crate::error::CoordinationError;

/// In-memory counter table for testing.
///
/// Conflicts can be injected to exercise the allocator's retry path without
/// real concurrency.
pub struct MemoryCounterStore {
    inner: Mutex<Inner>,
}

struct Inner {
    rows: BTreeMap<i64, CounterRow>,
    /// Number of upcoming inserts to reject as conflicts.
    injected_conflicts: u32,
    always_conflict: bool,
    insert_attempts: u64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                rows: BTreeMap::new(),
                injected_conflicts: 0,
                always_conflict: false,
                insert_attempts: 0,
            }),
        }
    }

    /// Reject the next `n` inserts as if another server won the race.
    pub fn inject_conflicts(&self, n: u32) {
        self.inner.lock().injected_conflicts = n;
    }

    /// Reject every insert.
    pub fn always_conflict(&self) {
        self.inner.lock().always_conflict = true;
    }

    pub fn rows(&self) -> Vec<CounterRow> {
        self.inner.lock().rows.values().cloned().collect()
    }

    /// Total calls to `insert`, including conflicts.
    pub fn insert_attempts(&self) -> u64 {
        self.inner.lock().insert_attempts
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn query_max_id(&self) -> Result<i64, CoordinationError> {
        Ok(self
            .inner
            .lock()
            .rows
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    async fn insert(&self, row: &CounterRow) -> Result<InsertOutcome, CoordinationError> {
        let mut inner = self.inner.lock();
        inner.insert_attempts += 1;
        if inner.always_conflict {
            return Ok(InsertOutcome::Conflict);
        }
        if inner.injected_conflicts > 0 {
            inner.injected_conflicts -= 1;
            return Ok(InsertOutcome::Conflict);
        }
        if inner.rows.contains_key(&row.id) {
            return Ok(InsertOutcome::Conflict);
        }
        inner.rows.insert(row.id, row.clone());
        Ok(InsertOutcome::Inserted)
    }
}
