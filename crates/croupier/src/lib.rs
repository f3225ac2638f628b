//! Fleet coordination for casino game rounds.
//!
//! Stateless game servers receive round lifecycle events (bet-open, bet-close,
//! draw, pause) at least once, possibly duplicated and out of order. This
//! crate makes each `(round, command, request)` take effect exactly once
//! across the fleet, using only a shared key-value store and a relational
//! counter table:
//!
//! - [`id_allocator`] assigns each process a unique server identity.
//! - [`sequence`] turns that identity into a stream of snowflake ids.
//! - [`lock`] provides lease-based mutual exclusion.
//! - [`heartbeat`] estimates how many servers are alive.
//! - [`dispatcher`] binds rounds, deduplicates events and notifies listeners.
//!
//! [`coordinator::Coordinator`] wires these together for one process.

pub mod config;
pub mod coordinator;
pub mod counter_store;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod id_allocator;
pub mod kv_store;
pub mod listener;
pub mod lock;
pub mod metrics;
pub mod round_cache;
pub mod round_registry;
pub mod sequence;
pub mod snowflake;
pub mod storage;
pub mod testing;
pub mod types;

/// Prelude module for convenient glob imports.
pub mod prelude {
    pub use crate::config::CoordinatorConfig;
    pub use crate::coordinator::Coordinator;
    pub use crate::dispatcher::DispatchOutcome;
    pub use crate::error::CoordinationError;
    pub use crate::listener::{Notification, RoundListener};
    pub use crate::round_registry::{CloseOutcome, RoundEvent, RoundRegistry, RoundState};
    pub use crate::types::{EventCommand, RequestId, RoomId, RoundNo, ServerId};
}
