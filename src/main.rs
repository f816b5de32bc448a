use actix::Actor;
use actix_web::{web, App, HttpServer};
use arena_realtime_server::broadcast::new_shared_broadcaster;
use arena_realtime_server::game::BattleManager;
use arena_realtime_server::handlers::{get_lobby_state, list_lobbies, ws_handler};
use arena_realtime_server::lobby::{LobbyConfig, LobbyManager};
use arena_realtime_server::matchmaking::MatchQueue;
use arena_realtime_server::models::{MatchResult, MatchType};
use arena_realtime_server::registry::new_shared_registry;
use tokio::sync::mpsc;

/// 起動時に定義する固定ロビー（ステークティアごとに1つ）
fn default_lobby_configs() -> Vec<LobbyConfig> {
    vec![
        LobbyConfig {
            lobby_id: "practice".to_string(),
            capacity: 8,
            min_quorum: 2,
            match_type: MatchType::Free,
            stake_amount: 0,
        },
        LobbyConfig {
            lobby_id: "duel".to_string(),
            capacity: 2,
            min_quorum: 2,
            match_type: MatchType::Staked,
            stake_amount: 100,
        },
        LobbyConfig {
            lobby_id: "arena-ranked".to_string(),
            capacity: 8,
            min_quorum: 4,
            match_type: MatchType::Staked,
            stake_amount: 500,
        },
    ]
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let registry = new_shared_registry();
    let broadcaster = new_shared_broadcaster();

    // 終了したマッチの結果は専用チャンネルで受けてログに流す
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<MatchResult>();
    tokio::spawn(async move {
        while let Some(result) = result_rx.recv().await {
            println!("📜 Match result: {:?}", result);
        }
    });

    let battle_manager = BattleManager::new(registry.clone(), broadcaster.clone(), result_tx).start();
    let lobby_manager = LobbyManager::new(
        default_lobby_configs(),
        registry.clone(),
        broadcaster.clone(),
        battle_manager.clone(),
    )
    .start();
    let match_queue = MatchQueue::new(registry.clone(), battle_manager.clone()).start();

    println!("🚀 Server starting at http://0.0.0.0:8080");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(broadcaster.clone()))
            .app_data(web::Data::new(lobby_manager.clone()))
            .app_data(web::Data::new(match_queue.clone()))
            .app_data(web::Data::new(battle_manager.clone()))
            .route("/api/lobbies", web::get().to(list_lobbies))
            .route("/api/lobbies/{lobby_id}", web::get().to(get_lobby_state))
            .route("/ws", web::get().to(ws_handler))
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
