use actix::Actor;
use actix_web::{web, App};
use arena_realtime_server::broadcast::new_shared_broadcaster;
use arena_realtime_server::game::BattleManager;
use arena_realtime_server::handlers::ws_handler;
use arena_realtime_server::lobby::manager::LobbyTiming;
use arena_realtime_server::lobby::{LobbyConfig, LobbyManager};
use arena_realtime_server::matchmaking::MatchQueue;
use arena_realtime_server::models::MatchType;
use arena_realtime_server::registry::new_shared_registry;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn start_server(configs: Vec<LobbyConfig>, timing: LobbyTiming) -> actix_test::TestServer {
    let registry = new_shared_registry();
    let broadcaster = new_shared_broadcaster();
    let (result_tx, _result_rx) = mpsc::unbounded_channel();
    let battle_manager =
        BattleManager::new(registry.clone(), broadcaster.clone(), result_tx).start();
    let lobby_manager = LobbyManager::new(
        configs,
        registry.clone(),
        broadcaster.clone(),
        battle_manager.clone(),
    )
    .with_timing(timing)
    .start();
    let match_queue = MatchQueue::new(registry.clone(), battle_manager.clone()).start();

    actix_test::start(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(broadcaster.clone()))
            .app_data(web::Data::new(lobby_manager.clone()))
            .app_data(web::Data::new(match_queue.clone()))
            .app_data(web::Data::new(battle_manager.clone()))
            .route("/ws", web::get().to(ws_handler))
    })
}

fn fast_timing() -> LobbyTiming {
    LobbyTiming {
        countdown_ticks: 2,
        backfill_countdown_ticks: 1,
        tick_interval: Duration::from_millis(50),
        backfill_delay: Duration::from_secs(30),
    }
}

fn practice_config() -> LobbyConfig {
    LobbyConfig {
        lobby_id: "practice".to_string(),
        capacity: 2,
        min_quorum: 2,
        match_type: MatchType::Free,
        stake_amount: 0,
    }
}

async fn connect(srv: &actix_test::TestServer, player_id: &str) -> WsClient {
    let url = format!("ws://{}/ws?player_id={}", srv.addr(), player_id);
    let (client, _) = connect_async(url).await.expect("connection failed");
    client
}

async fn recv_event(client: &mut WsClient) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream closed")
            .expect("protocol error");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).expect("invalid json"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn recv_until(client: &mut WsClient, event_type: &str) -> Value {
    loop {
        let event = recv_event(client).await;
        if event["type"] == event_type {
            return event;
        }
    }
}

async fn send_event(client: &mut WsClient, event: Value) {
    client
        .send(Message::Text(event.to_string().into()))
        .await
        .expect("send failed");
}

#[actix_rt::test]
async fn connection_hello_and_invalid_payload() {
    let srv = start_server(vec![practice_config()], fast_timing());
    let mut alice = connect(&srv, "alice").await;

    let hello = recv_until(&mut alice, "Connected").await;
    assert_eq!(hello["data"]["connection_id"], "alice");

    // 解釈できないテキストは拒否イベントになり、接続は維持される
    alice
        .send(Message::Text("definitely not json".into()))
        .await
        .unwrap();
    let error = recv_until(&mut alice, "Error").await;
    assert_eq!(error["data"]["code"], "PreconditionFailed");

    send_event(
        &mut alice,
        json!({"type": "GetLobbyState", "data": {"lobby_id": "practice"}}),
    )
    .await;
    let state = recv_until(&mut alice, "LobbyUpdated").await;
    assert_eq!(state["data"]["snapshot"]["lobby_id"], "practice");
}

#[actix_rt::test]
async fn lobby_flow_from_join_to_battle() {
    let srv = start_server(vec![practice_config()], fast_timing());
    let mut alice = connect(&srv, "alice").await;
    let mut bob = connect(&srv, "bob").await;
    recv_until(&mut alice, "Connected").await;
    recv_until(&mut bob, "Connected").await;

    send_event(
        &mut alice,
        json!({"type": "JoinLobby", "data": {"lobby_id": "practice", "display_name": "Alice"}}),
    )
    .await;
    let joined = recv_until(&mut alice, "PlayerJoinedLobby").await;
    assert_eq!(joined["data"]["connection_id"], "alice");
    assert_eq!(joined["data"]["display_name"], "Alice");
    assert_eq!(joined["data"]["is_ai"], false);

    // 既存メンバーにも新規参加が配信される
    send_event(
        &mut bob,
        json!({"type": "JoinLobby", "data": {"lobby_id": "practice", "display_name": null}}),
    )
    .await;
    let joined = recv_until(&mut alice, "PlayerJoinedLobby").await;
    assert_eq!(joined["data"]["connection_id"], "bob");

    send_event(
        &mut alice,
        json!({"type": "SetReady", "data": {"lobby_id": "practice", "ready": true}}),
    )
    .await;
    send_event(
        &mut bob,
        json!({"type": "SetReady", "data": {"lobby_id": "practice", "ready": true}}),
    )
    .await;

    recv_until(&mut alice, "MatchStarting").await;
    let started = recv_until(&mut alice, "MatchStarted").await;
    let room_id = started["data"]["room_id"].as_str().unwrap().to_string();

    let state = recv_until(&mut bob, "StateUpdate").await;
    assert_eq!(state["data"]["state"]["room_id"], room_id.as_str());
    assert_eq!(state["data"]["state"]["combatants"].as_array().unwrap().len(), 2);
}

#[actix_rt::test]
async fn queue_pairing_and_battle_to_the_end() {
    let srv = start_server(vec![practice_config()], fast_timing());
    let mut alice = connect(&srv, "alice").await;
    let mut bob = connect(&srv, "bob").await;
    recv_until(&mut alice, "Connected").await;
    recv_until(&mut bob, "Connected").await;

    send_event(&mut alice, json!({"type": "JoinQueue", "data": {}})).await;
    send_event(&mut bob, json!({"type": "JoinQueue", "data": {}})).await;

    let found = recv_until(&mut alice, "MatchFound").await;
    assert_eq!(found["data"]["opponent_id"], "bob");
    let room_id = found["data"]["room_id"].as_str().unwrap().to_string();
    let found = recv_until(&mut bob, "MatchFound").await;
    assert_eq!(found["data"]["opponent_id"], "alice");
    assert_eq!(found["data"]["room_id"], room_id.as_str());

    // ルームが出来てからアクションを送る
    recv_until(&mut alice, "StateUpdate").await;
    recv_until(&mut bob, "StateUpdate").await;

    // 既定ダメージは1、HPは3。2発目まではActionResult、3発目で決着
    for expected_hp in [2, 1] {
        send_event(
            &mut alice,
            json!({"type": "SubmitAction", "data": {"room_id": room_id, "action": "Attack"}}),
        )
        .await;
        let result = recv_until(&mut alice, "ActionResult").await;
        assert_eq!(result["data"]["actor_id"], "alice");
        assert_eq!(result["data"]["target_id"], "bob");
        assert_eq!(result["data"]["target_hp"], expected_hp);
    }
    send_event(
        &mut alice,
        json!({"type": "SubmitAction", "data": {"room_id": room_id, "action": "Attack"}}),
    )
    .await;

    for client in [&mut alice, &mut bob] {
        let ended = recv_until(client, "MatchEnded").await;
        assert_eq!(ended["data"]["winner_id"], "alice");
        assert_eq!(ended["data"]["by_disconnect"], false);
    }
}

#[actix_rt::test]
async fn switching_spectate_target_drops_the_old_subscription() {
    let srv = start_server(vec![practice_config()], fast_timing());
    let mut alice = connect(&srv, "alice").await;
    let mut bob = connect(&srv, "bob").await;
    let mut carol = connect(&srv, "carol").await;
    let mut dave = connect(&srv, "dave").await;
    let mut watcher = connect(&srv, "watcher").await;
    for client in [&mut alice, &mut bob, &mut carol, &mut dave, &mut watcher] {
        recv_until(client, "Connected").await;
    }

    // 2ルーム分のペアを成立させる
    send_event(&mut alice, json!({"type": "JoinQueue", "data": {}})).await;
    send_event(&mut bob, json!({"type": "JoinQueue", "data": {}})).await;
    let found = recv_until(&mut alice, "MatchFound").await;
    let room_a = found["data"]["room_id"].as_str().unwrap().to_string();
    send_event(&mut carol, json!({"type": "JoinQueue", "data": {}})).await;
    send_event(&mut dave, json!({"type": "JoinQueue", "data": {}})).await;
    let found = recv_until(&mut carol, "MatchFound").await;
    let room_b = found["data"]["room_id"].as_str().unwrap().to_string();
    recv_until(&mut alice, "StateUpdate").await;
    recv_until(&mut carol, "StateUpdate").await;

    send_event(
        &mut watcher,
        json!({"type": "Spectate", "data": {"room_id": room_a}}),
    )
    .await;
    let state = recv_until(&mut watcher, "StateUpdate").await;
    assert_eq!(state["data"]["state"]["room_id"], room_a.as_str());

    // 観戦先を切り替える
    send_event(
        &mut watcher,
        json!({"type": "Spectate", "data": {"room_id": room_b}}),
    )
    .await;
    let state = recv_until(&mut watcher, "StateUpdate").await;
    assert_eq!(state["data"]["state"]["room_id"], room_b.as_str());

    // 旧ルームで先にアクションを起こしても、届く最初の結果は新ルームのもの
    send_event(
        &mut alice,
        json!({"type": "SubmitAction", "data": {"room_id": room_a, "action": "Attack"}}),
    )
    .await;
    recv_until(&mut alice, "ActionResult").await;
    send_event(
        &mut carol,
        json!({"type": "SubmitAction", "data": {"room_id": room_b, "action": "Attack"}}),
    )
    .await;
    let result = recv_until(&mut watcher, "ActionResult").await;
    assert_eq!(result["data"]["room_id"], room_b.as_str());
}

#[actix_rt::test]
async fn dropping_the_socket_forfeits_the_battle() {
    let srv = start_server(vec![practice_config()], fast_timing());
    let mut alice = connect(&srv, "alice").await;
    let mut bob = connect(&srv, "bob").await;
    recv_until(&mut alice, "Connected").await;
    recv_until(&mut bob, "Connected").await;

    send_event(&mut alice, json!({"type": "JoinQueue", "data": {}})).await;
    send_event(&mut bob, json!({"type": "JoinQueue", "data": {}})).await;
    recv_until(&mut alice, "StateUpdate").await;
    recv_until(&mut bob, "StateUpdate").await;

    // bobの回線が落ちる
    bob.close(None).await.unwrap();

    let gone = recv_until(&mut alice, "OpponentDisconnected").await;
    assert_eq!(gone["data"]["connection_id"], "bob");
    let ended = recv_until(&mut alice, "MatchEnded").await;
    assert_eq!(ended["data"]["winner_id"], "alice");
    assert_eq!(ended["data"]["by_disconnect"], true);
}
