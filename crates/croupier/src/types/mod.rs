mod command;
mod dedup_key;
mod node_id;
mod round_no;
mod server_id;

pub use command::EventCommand;
pub use dedup_key::DedupKey;
pub use node_id::{NodeId, NodeIdError, MAX_NODE_ID};
pub use round_no::{RequestId, RoomId, RoundNo};
pub use server_id::ServerId;

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! serde_round_trip {
        ($name:ident, $val:expr) => {
            #[test]
            fn $name() {
                let val = $val;
                let json = serde_json::to_string(&val).unwrap();
                let decoded = serde_json::from_str(&json).unwrap();
                assert_eq!(val, decoded);
            }
        };
    }

    serde_round_trip!(server_id_json, ServerId::new(42));
    serde_round_trip!(node_id_json, NodeId::validated(42).unwrap());
    serde_round_trip!(round_no_json, RoundNo::new("R-100"));
    serde_round_trip!(command_json, EventCommand::BetClose);

    #[test]
    fn commands_use_upstream_names() {
        assert_eq!(
            serde_json::to_string(&EventCommand::BetOpen).unwrap(),
            "\"bet-open\""
        );
        let stop: EventCommand = serde_json::from_str("\"bet-stop\"").unwrap();
        assert_eq!(stop, EventCommand::BetClose);
        let draw: EventCommand = serde_json::from_str("\"draw\"").unwrap();
        assert!(draw.is_settlement());
    }

    #[test]
    fn round_no_is_transparent() {
        assert_eq!(
            serde_json::to_string(&RoundNo::new("R-7")).unwrap(),
            "\"R-7\""
        );
    }

    #[test]
    fn dedup_key_is_deterministic() {
        let a = DedupKey::new(
            RoundNo::new("R-100"),
            EventCommand::BetClose,
            RequestId::new("REQ-A"),
        );
        let b = DedupKey::new(
            RoundNo::new("R-100"),
            EventCommand::BetClose,
            RequestId::new("REQ-A"),
        );
        assert_eq!(a, b);
        assert_eq!(
            a.storage_key("croupier:"),
            "croupier:dedup:5:R-100:bet-close:5:REQ-A"
        );

        let other = DedupKey::new(
            RoundNo::new("R-100"),
            EventCommand::Draw,
            RequestId::new("REQ-A"),
        );
        assert_ne!(a.storage_key("p:"), other.storage_key("p:"));
    }

    #[test]
    fn dedup_key_separators_in_ids_stay_distinct() {
        let a = DedupKey::new(
            RoundNo::new("R:pause:X"),
            EventCommand::BetOpen,
            RequestId::new("Y"),
        );
        let b = DedupKey::new(
            RoundNo::new("R"),
            EventCommand::Pause,
            RequestId::new("X:bet-open:Y"),
        );
        assert_ne!(a.storage_key("croupier:"), b.storage_key("croupier:"));

        let c = DedupKey::new(
            RoundNo::new("R-1:bet-open:2"),
            EventCommand::BetOpen,
            RequestId::new("Z"),
        );
        let d = DedupKey::new(
            RoundNo::new("R-1"),
            EventCommand::BetOpen,
            RequestId::new("2:bet-open:Z"),
        );
        assert_ne!(c.to_string(), d.to_string());
    }

    #[test]
    fn server_owner_tag() {
        assert_eq!(ServerId::new(9).owner_tag(), "server-9");
    }
}
