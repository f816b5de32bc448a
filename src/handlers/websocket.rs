use crate::broadcast::{RoomKey, SharedBroadcaster};
use crate::game::manager::{BattleManager, HandleDisconnect, Spectate, SubmitAction};
use crate::lobby::manager::{GetLobbyState, JoinLobby, LeaveLobby, LobbyManager, SetReady};
use crate::matchmaking::{Dequeue, Enqueue, MatchQueue};
use crate::models::{ConnectionStatus, CoordinatorError, ErrorCode, WsMessage};
use crate::registry::SharedRegistry;
use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// WebSocketセッションアクター（コーディネータのファサード）
/// ここではルーティングだけを行い、共有状態の変更は各マネージャーに任せる
pub struct WsSession {
    /// ハートビート最終時刻
    hb: Instant,
    /// 接続ID
    connection_id: String,
    /// 観戦中のルーム
    spectating: Option<Uuid>,
    /// 共有コネクションレジストリ
    registry: SharedRegistry,
    /// 共有ブロードキャスター
    broadcaster: SharedBroadcaster,
    /// 各マネージャーアクターのアドレス
    lobby_manager: Addr<LobbyManager>,
    match_queue: Addr<MatchQueue>,
    battle_manager: Addr<BattleManager>,
    /// メッセージ受信チャンネル
    rx: Option<mpsc::UnboundedReceiver<WsMessage>>,
    /// メッセージ送信チャンネル
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl WsSession {
    pub fn new(
        connection_id: String,
        registry: SharedRegistry,
        broadcaster: SharedBroadcaster,
        lobby_manager: Addr<LobbyManager>,
        match_queue: Addr<MatchQueue>,
        battle_manager: Addr<BattleManager>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            hb: Instant::now(),
            connection_id,
            spectating: None,
            registry,
            broadcaster,
            lobby_manager,
            match_queue,
            battle_manager,
            rx: Some(rx),
            tx,
        }
    }

    /// ハートビート送信
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(Duration::from_secs(5), |act, ctx| {
            if Instant::now().duration_since(act.hb) > Duration::from_secs(10) {
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// メッセージポーリング
    fn poll_messages(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(Duration::from_millis(10), |act, ctx| {
            if let Some(rx) = &mut act.rx {
                while let Ok(msg) = rx.try_recv() {
                    if let Ok(json) = serde_json::to_string(&msg) {
                        ctx.text(json);
                    }
                }
            }
        });
    }

    /// 受信イベントのルーティング
    fn route(&mut self, message: WsMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match message {
            WsMessage::JoinLobby {
                lobby_id,
                display_name,
            } => {
                let display_name = display_name.unwrap_or_else(|| self.connection_id.clone());
                self.lobby_manager.do_send(JoinLobby {
                    lobby_id,
                    connection_id: self.connection_id.clone(),
                    display_name,
                    tx: self.tx.clone(),
                });
            }
            WsMessage::LeaveLobby { lobby_id } => {
                self.lobby_manager.do_send(LeaveLobby {
                    lobby_id,
                    connection_id: self.connection_id.clone(),
                });
            }
            WsMessage::GetLobbyState { lobby_id } => {
                let lobby_manager = self.lobby_manager.clone();
                let tx = self.tx.clone();
                ctx.spawn(
                    async move {
                        match lobby_manager
                            .send(GetLobbyState {
                                lobby_id: lobby_id.clone(),
                            })
                            .await
                        {
                            Ok(Some(snapshot)) => {
                                let _ = tx.send(WsMessage::LobbyUpdated {
                                    snapshot,
                                    timestamp: Utc::now(),
                                });
                            }
                            Ok(None) => {
                                let _ = tx.send(
                                    CoordinatorError::LobbyNotFound(lobby_id).to_ws_message(),
                                );
                            }
                            Err(e) => {
                                println!("❌ Lobby manager unreachable: {}", e);
                            }
                        }
                    }
                    .into_actor(self),
                );
            }
            WsMessage::SetReady {
                lobby_id,
                ready,
                stake_confirmed,
            } => {
                self.lobby_manager.do_send(SetReady {
                    lobby_id,
                    connection_id: self.connection_id.clone(),
                    ready,
                    stake_confirmed,
                    tx: self.tx.clone(),
                });
            }
            WsMessage::JoinQueue { preferences } => {
                self.match_queue.do_send(Enqueue {
                    connection_id: self.connection_id.clone(),
                    display_name: self.connection_id.clone(),
                    preferences: preferences.unwrap_or_default(),
                    tx: self.tx.clone(),
                });
            }
            WsMessage::LeaveQueue => {
                self.match_queue.do_send(Dequeue {
                    connection_id: self.connection_id.clone(),
                });
            }
            WsMessage::SubmitAction {
                room_id,
                action,
                target_id,
            } => {
                self.battle_manager.do_send(SubmitAction {
                    room_id,
                    connection_id: self.connection_id.clone(),
                    action,
                    target_id,
                    tx: self.tx.clone(),
                });
            }
            WsMessage::Spectate { room_id } => {
                // 観戦先を切り替えるとき、前のルームの購読を残さない
                if let Some(previous) = self.spectating.take() {
                    if previous != room_id {
                        self.broadcaster
                            .lock()
                            .unwrap()
                            .unsubscribe(&RoomKey::Battle(previous), &self.connection_id);
                    }
                }
                self.spectating = Some(room_id);
                self.battle_manager.do_send(Spectate {
                    room_id,
                    connection_id: self.connection_id.clone(),
                    tx: self.tx.clone(),
                });
            }
            _ => {
                println!("⚠️ Unhandled message type from {}", self.connection_id);
                let _ = self.tx.send(WsMessage::Error {
                    code: ErrorCode::PreconditionFailed,
                    message: "unsupported message type".to_string(),
                });
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        self.poll_messages(ctx);

        self.registry.lock().unwrap().register(&self.connection_id);
        println!("🔌 Connected: connection_id={}", self.connection_id);

        let _ = self.tx.send(WsMessage::Connected {
            connection_id: self.connection_id.clone(),
            timestamp: Utc::now(),
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        println!("🔌 Disconnected: connection_id={}", self.connection_id);

        // 切断はエラーではなく通常の終端イベント。最後の状態に応じた掃除だけを行う
        let prior = self
            .registry
            .lock()
            .unwrap()
            .deregister(&self.connection_id);

        if let Some(connection) = prior {
            match connection.status {
                ConnectionStatus::Idle => {}
                ConnectionStatus::Queued { .. } => {
                    self.match_queue.do_send(Dequeue {
                        connection_id: self.connection_id.clone(),
                    });
                }
                ConnectionStatus::InLobby { lobby_id } => {
                    self.lobby_manager.do_send(LeaveLobby {
                        lobby_id,
                        connection_id: self.connection_id.clone(),
                    });
                }
                ConnectionStatus::InBattle { room_id } => {
                    self.battle_manager.do_send(HandleDisconnect {
                        room_id,
                        connection_id: self.connection_id.clone(),
                    });
                }
            }
        }

        if let Some(room_id) = self.spectating.take() {
            self.broadcaster
                .lock()
                .unwrap()
                .unsubscribe(&RoomKey::Battle(room_id), &self.connection_id);
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(ws_msg) => self.route(ws_msg, ctx),
                    Err(_) => {
                        println!("❌ Failed to deserialize WsMessage: {}", text);
                        let error_msg = WsMessage::Error {
                            code: ErrorCode::PreconditionFailed,
                            message: format!("Invalid message format: {}", text),
                        };
                        if let Ok(json) = serde_json::to_string(&error_msg) {
                            ctx.text(json);
                        }
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// WebSocketエンドポイント
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    registry: web::Data<SharedRegistry>,
    broadcaster: web::Data<SharedBroadcaster>,
    lobby_manager: web::Data<Addr<LobbyManager>>,
    match_queue: web::Data<Addr<MatchQueue>>,
    battle_manager: web::Data<Addr<BattleManager>>,
    query: web::Query<std::collections::HashMap<String, String>>,
) -> Result<HttpResponse, Error> {
    // クエリパラメータからplayer_idを取得（なければ生成）
    let connection_id = query
        .get("player_id")
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    println!("🔌 WebSocket connection attempt: connection_id={}", connection_id);

    let session = WsSession::new(
        connection_id,
        registry.get_ref().clone(),
        broadcaster.get_ref().clone(),
        lobby_manager.get_ref().clone(),
        match_queue.get_ref().clone(),
        battle_manager.get_ref().clone(),
    );

    ws::start(session, &req, stream)
}
