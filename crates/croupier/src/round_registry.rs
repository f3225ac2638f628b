use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;
use crate::types::{DedupKey, EventCommand, RequestId, RoomId, RoundNo};

/// Cached metadata of one game round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    /// Identifier assigned by the round registry.
    pub round_id: i64,
    pub room_id: RoomId,
    pub round_no: RoundNo,
    pub next_round_no: Option<RoundNo>,
    pub last_command: Option<EventCommand>,
    pub last_event_time: Option<DateTime<Utc>>,
}

impl RoundState {
    /// A freshly bound round with no accepted events.
    pub fn bound(round_id: i64, room_id: RoomId, round_no: RoundNo) -> Self {
        Self {
            round_id,
            room_id,
            round_no,
            next_round_no: None,
            last_command: None,
            last_event_time: None,
        }
    }

    /// Record an accepted event on this round.
    pub(crate) fn apply(&mut self, event: &RoundEvent) {
        self.last_command = Some(event.command);
        self.last_event_time = Some(event.occurred_at);
        if event.next_round_no.is_some() {
            self.next_round_no = event.next_round_no.clone();
        }
    }
}

/// An inbound lifecycle event, as delivered by an upstream producer.
///
/// Delivery is at-least-once: the same `(round_no, command, request_id)` may
/// arrive several times, on several servers, in any order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEvent {
    pub room_id: RoomId,
    pub round_no: RoundNo,
    pub command: EventCommand,
    pub request_id: RequestId,
    /// Round to open after a draw; ignored for other commands.
    #[serde(default)]
    pub next_round_no: Option<RoundNo>,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    /// Opaque producer data handed to listeners unchanged.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RoundEvent {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(
            self.round_no.clone(),
            self.command,
            self.request_id.clone(),
        )
    }
}

/// Result of closing a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
}

/// External system of record for game rounds.
///
/// Implementations must make `resolve_or_create_round` idempotent per
/// `(round_no, room_id)` on their own; the dispatcher additionally guards
/// creation with a fleet-wide lock to avoid thundering creates.
#[async_trait]
pub trait RoundRegistry: Send + Sync {
    async fn resolve_or_create_round(
        &self,
        round_no: &RoundNo,
        room_id: &RoomId,
    ) -> Result<RoundState, CoordinationError>;

    async fn close_round(
        &self,
        round_no: &RoundNo,
        room_id: &RoomId,
    ) -> Result<CloseOutcome, CoordinationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_deserializes_with_defaults() {
        let json = r#"{"room_id":"room-1","round_no":"R-1","command":"bet-stop","request_id":"REQ-A"}"#;
        let event: RoundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.command, EventCommand::BetClose);
        assert!(event.next_round_no.is_none());
        assert!(event.payload.is_null());
        assert_eq!(event.dedup_key().to_string(), "3:R-1:bet-close:5:REQ-A");
    }

    #[test]
    fn apply_tracks_last_event() {
        let mut state = RoundState::bound(7, RoomId::new("room-1"), RoundNo::new("R-1"));
        let event = RoundEvent {
            room_id: RoomId::new("room-1"),
            round_no: RoundNo::new("R-1"),
            command: EventCommand::Draw,
            request_id: RequestId::new("REQ-1"),
            next_round_no: Some(RoundNo::new("R-2")),
            occurred_at: Utc::now(),
            payload: serde_json::Value::Null,
        };
        state.apply(&event);
        assert_eq!(state.last_command, Some(EventCommand::Draw));
        assert_eq!(state.last_event_time, Some(event.occurred_at));
        assert_eq!(state.next_round_no, Some(RoundNo::new("R-2")));
    }
}
