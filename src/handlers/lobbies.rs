use crate::lobby::manager::{GetLobbyState, ListLobbies, LobbyManager};
use crate::models::ApiError;
use actix::Addr;
use actix_web::{web, HttpResponse, Responder};

/// GET /api/lobbies - ロビー一覧
pub async fn list_lobbies(lobby_manager: web::Data<Addr<LobbyManager>>) -> impl Responder {
    match lobby_manager.send(ListLobbies).await {
        Ok(summaries) => HttpResponse::Ok().json(summaries),
        Err(e) => {
            println!("❌ Lobby manager unreachable: {}", e);
            HttpResponse::InternalServerError().json(ApiError {
                message: "lobby manager unavailable".to_string(),
            })
        }
    }
}

/// GET /api/lobbies/{lobby_id} - ロビー状態スナップショット
pub async fn get_lobby_state(
    lobby_manager: web::Data<Addr<LobbyManager>>,
    path: web::Path<String>,
) -> impl Responder {
    let lobby_id = path.into_inner();
    match lobby_manager.send(GetLobbyState { lobby_id }).await {
        Ok(Some(snapshot)) => HttpResponse::Ok().json(snapshot),
        Ok(None) => HttpResponse::NotFound().json(ApiError {
            message: "lobby not found".to_string(),
        }),
        Err(e) => {
            println!("❌ Lobby manager unreachable: {}", e);
            HttpResponse::InternalServerError().json(ApiError {
                message: "lobby manager unavailable".to_string(),
            })
        }
    }
}
