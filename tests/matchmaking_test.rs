use actix::{Actor, Addr};
use arena_realtime_server::broadcast::new_shared_broadcaster;
use arena_realtime_server::game::BattleManager;
use arena_realtime_server::matchmaking::{Dequeue, Enqueue, MatchQueue};
use arena_realtime_server::models::{
    ConnectionStatus, ErrorCode, MatchPreferences, WsMessage,
};
use arena_realtime_server::registry::{new_shared_registry, SharedRegistry};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

struct Harness {
    queue: Addr<MatchQueue>,
    registry: SharedRegistry,
}

fn start_harness() -> Harness {
    let registry = new_shared_registry();
    let broadcaster = new_shared_broadcaster();
    let (result_tx, _result_rx) = mpsc::unbounded_channel();
    let battle_manager =
        BattleManager::new(registry.clone(), broadcaster, result_tx).start();
    let queue = MatchQueue::new(registry.clone(), battle_manager).start();
    Harness { queue, registry }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> WsMessage {
    timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

async fn enqueue(harness: &Harness, connection_id: &str) -> mpsc::UnboundedReceiver<WsMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    harness
        .queue
        .send(Enqueue {
            connection_id: connection_id.to_string(),
            display_name: connection_id.to_string(),
            preferences: MatchPreferences::default(),
            tx,
        })
        .await
        .unwrap();
    rx
}

async fn expect_match_found(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> (Uuid, String, bool) {
    loop {
        if let WsMessage::MatchFound {
            room_id,
            opponent_id,
            is_first,
            ..
        } = recv(rx).await
        {
            return (room_id, opponent_id, is_first);
        }
    }
}

#[actix_rt::test]
async fn oldest_two_entries_are_paired_first() {
    let harness = start_harness();

    let mut rx1 = enqueue(&harness, "player1").await;
    // 一人では成立しない
    assert!(rx1.try_recv().is_err());
    assert!(matches!(
        harness.registry.lock().unwrap().get("player1").unwrap().status,
        ConnectionStatus::Queued { .. }
    ));

    let mut rx2 = enqueue(&harness, "player2").await;
    let (room1, opponent1, first1) = expect_match_found(&mut rx1).await;
    let (room2, opponent2, first2) = expect_match_found(&mut rx2).await;
    assert_eq!(room1, room2);
    assert_eq!(opponent1, "player2");
    assert_eq!(opponent2, "player1");
    assert!(first1);
    assert!(!first2);

    // 次の2人は別ルームで成立する
    let mut rx3 = enqueue(&harness, "player3").await;
    let mut rx4 = enqueue(&harness, "player4").await;
    let (room3, opponent3, _) = expect_match_found(&mut rx3).await;
    let (room4, _, _) = expect_match_found(&mut rx4).await;
    assert_eq!(room3, room4);
    assert_ne!(room1, room3);
    assert_eq!(opponent3, "player4");

    // ルーム作成が済むと初期状態が届き、レジストリはInBattleになる
    loop {
        if let WsMessage::StateUpdate { state, .. } = recv(&mut rx1).await {
            assert_eq!(state.room_id, room1);
            break;
        }
    }
    assert_eq!(
        harness.registry.lock().unwrap().get("player1").unwrap().status,
        ConnectionStatus::InBattle { room_id: room1 }
    );
}

#[actix_rt::test]
async fn double_enqueue_is_rejected() {
    let harness = start_harness();

    let _rx = enqueue(&harness, "player1").await;
    let mut again = enqueue(&harness, "player1").await;
    match recv(&mut again).await {
        WsMessage::Error { code, .. } => assert_eq!(code, ErrorCode::Conflict),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[actix_rt::test]
async fn lobby_member_cannot_enqueue() {
    let harness = start_harness();
    {
        let mut registry = harness.registry.lock().unwrap();
        registry.register("player1");
        registry
            .set_status(
                "player1",
                ConnectionStatus::InLobby {
                    lobby_id: "practice".to_string(),
                },
            )
            .unwrap();
    }

    let mut rx = enqueue(&harness, "player1").await;
    match recv(&mut rx).await {
        WsMessage::Error { code, .. } => assert_eq!(code, ErrorCode::Conflict),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[actix_rt::test]
async fn dequeue_is_idempotent_and_frees_the_slot() {
    let harness = start_harness();

    let _rx1 = enqueue(&harness, "player1").await;
    for _ in 0..2 {
        harness
            .queue
            .send(Dequeue {
                connection_id: "player1".to_string(),
            })
            .await
            .unwrap();
    }
    assert_eq!(
        harness.registry.lock().unwrap().get("player1").unwrap().status,
        ConnectionStatus::Idle
    );

    // 離脱後に再参加すると改めてペアリング対象になる
    let mut rx2 = enqueue(&harness, "player2").await;
    let mut rx1 = enqueue(&harness, "player1").await;
    let (_, opponent2, first2) = expect_match_found(&mut rx2).await;
    let (_, opponent1, first1) = expect_match_found(&mut rx1).await;
    assert_eq!(opponent2, "player1");
    assert_eq!(opponent1, "player2");
    // 先に並んだ方がfirst
    assert!(first2);
    assert!(!first1);
}
