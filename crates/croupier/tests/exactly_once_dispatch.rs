use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use croupier::error::CoordinationError;
use croupier::listener::{Notification, RoundListener};
use croupier::round_registry::RoundEvent;
use croupier::testing::TestFleet;
use croupier::types::{EventCommand, RequestId, RoomId, RoundNo};

#[derive(Default)]
struct Settlement {
    seen: Mutex<Vec<Notification>>,
}

impl Settlement {
    fn events_for(&self, command: EventCommand) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|n| matches!(n, Notification::Event { event, .. } if event.command == command))
            .count()
    }

    fn closures(&self) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|n| matches!(n, Notification::RoundClosed { .. }))
            .count()
    }
}

#[async_trait]
impl RoundListener for Settlement {
    fn name(&self) -> &str {
        "settlement"
    }

    async fn on_notification(&self, notification: &Notification) -> Result<(), CoordinationError> {
        self.seen.lock().push(notification.clone());
        Ok(())
    }
}

fn event(round: &str, command: EventCommand, request: &str) -> RoundEvent {
    RoundEvent {
        room_id: RoomId::new("baccarat-1"),
        round_no: RoundNo::new(round),
        command,
        request_id: RequestId::new(request),
        next_round_no: None,
        occurred_at: Utc::now(),
        payload: serde_json::json!({ "table": "baccarat-1" }),
    }
}

#[tokio::test]
async fn bet_stop_retransmit_on_another_node_settles_once() {
    let fleet = TestFleet::new(2).await;
    let settlement = Arc::new(Settlement::default());
    fleet.register_listener(settlement.clone());

    let first = fleet
        .node(0)
        .dispatch(event("R-100", EventCommand::BetClose, "REQ-A"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = fleet
        .node(1)
        .dispatch(event("R-100", EventCommand::BetClose, "REQ-A"))
        .await
        .unwrap();

    assert!(first.is_accepted());
    assert!(!second.is_accepted());
    assert_eq!(settlement.events_for(EventCommand::BetClose), 1);
    fleet.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_deliveries_across_fleet_notify_once() {
    let fleet = Arc::new(TestFleet::new(3).await);
    let settlement = Arc::new(Settlement::default());
    fleet.register_listener(settlement.clone());

    let mut tasks = Vec::new();
    for i in 0..30 {
        let fleet = fleet.clone();
        tasks.push(tokio::spawn(async move {
            fleet
                .node(i % 3)
                .dispatch(event("R-200", EventCommand::BetOpen, "REQ-1"))
                .await
                .unwrap()
                .is_accepted()
        }));
    }
    let mut accepted = 0;
    for t in tasks {
        if t.await.unwrap() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(settlement.events_for(EventCommand::BetOpen), 1);
    assert_eq!(fleet.registry().created_count(), 1);
    fleet.shutdown().await;
}

#[tokio::test]
async fn full_round_lifecycle() {
    let fleet = TestFleet::new(3).await;
    let settlement = Arc::new(Settlement::default());
    fleet.register_listener(settlement.clone());

    let mut draw = event("R-300", EventCommand::Draw, "REQ-3");
    draw.next_round_no = Some(RoundNo::new("R-301"));

    let steps = [
        (0, event("R-300", EventCommand::BetOpen, "REQ-1")),
        (1, event("R-300", EventCommand::BetClose, "REQ-2")),
        (2, draw.clone()),
        // Producer retransmits the draw to a different node.
        (0, draw),
    ];
    let mut accepted = 0;
    for (node, e) in steps {
        if fleet.node(node).dispatch(e).await.unwrap().is_accepted() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 3);
    assert_eq!(settlement.events_for(EventCommand::Draw), 1);
    assert_eq!(settlement.closures(), 1);
    assert!(fleet.registry().is_closed(&RoundNo::new("R-300")));
    assert!(fleet.registry().contains(&RoundNo::new("R-301")));

    // The next round is already bound, so its first event skips the registry.
    let resolves = fleet.registry().resolve_calls();
    fleet
        .node(1)
        .dispatch(event("R-301", EventCommand::BetOpen, "REQ-4"))
        .await
        .unwrap();
    assert_eq!(fleet.registry().resolve_calls(), resolves);
    fleet.shutdown().await;
}

#[tokio::test]
async fn fleet_size_converges_on_heartbeats() {
    let fleet = TestFleet::new(3).await;
    for node in fleet.nodes() {
        node.heartbeat().run_cycle().await.unwrap();
    }
    // The last node to beat has seen every record.
    assert_eq!(fleet.node(2).heartbeat().approximate_cluster_size(), 3);
    assert_eq!(fleet.node(2).heartbeat().scaled_share(1000), 334);
    fleet.shutdown().await;
}
