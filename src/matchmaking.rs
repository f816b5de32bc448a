use crate::game::manager::{BattleManager, CreateRoom, HumanParticipant};
use crate::models::{ConnectionStatus, CoordinatorError, MatchPreferences, WsMessage};
use crate::registry::SharedRegistry;
use actix::prelude::*;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

/// キュー内の1エントリ（FIFO、joined_at昇順）
struct QueueEntry {
    connection_id: String,
    display_name: String,
    joined_at: DateTime<Utc>,
    #[allow(dead_code)]
    preferences: MatchPreferences,
    tx: mpsc::UnboundedSender<WsMessage>,
}

/// マッチメイキングキューアクター
/// enqueueのたびにペアリングパスが走り、先頭2件をバトルルームへ昇格させる
pub struct MatchQueue {
    entries: Vec<QueueEntry>,
    registry: SharedRegistry,
    battle_manager: Addr<BattleManager>,
}

impl MatchQueue {
    pub fn new(registry: SharedRegistry, battle_manager: Addr<BattleManager>) -> Self {
        Self {
            entries: Vec::new(),
            registry,
            battle_manager,
        }
    }

    /// ペアリングパス。2件以上ある限り最古の2件を組にする
    fn pair_waiting_entries(&mut self) {
        while self.entries.len() >= 2 {
            let first = self.entries.remove(0);
            let second = self.entries.remove(0);
            let room_id = Uuid::new_v4();

            println!(
                "🤝 Match found: room_id={}, first={}, second={}",
                room_id, first.connection_id, second.connection_id
            );

            let now = Utc::now();
            let _ = first.tx.send(WsMessage::MatchFound {
                room_id,
                opponent_id: second.connection_id.clone(),
                is_first: true,
                timestamp: now,
            });
            let _ = second.tx.send(WsMessage::MatchFound {
                room_id,
                opponent_id: first.connection_id.clone(),
                is_first: false,
                timestamp: now,
            });

            self.battle_manager.do_send(CreateRoom {
                room_id,
                humans: vec![
                    HumanParticipant {
                        connection_id: first.connection_id,
                        display_name: first.display_name,
                        tx: first.tx,
                    },
                    HumanParticipant {
                        connection_id: second.connection_id,
                        display_name: second.display_name,
                        tx: second.tx,
                    },
                ],
                ais: Vec::new(),
            });
        }
    }
}

impl Actor for MatchQueue {
    type Context = Context<Self>;
}

// メッセージ: キュー参加
#[derive(Message)]
#[rtype(result = "()")]
pub struct Enqueue {
    pub connection_id: String,
    pub display_name: String,
    pub preferences: MatchPreferences,
    pub tx: mpsc::UnboundedSender<WsMessage>,
}

impl Handler<Enqueue> for MatchQueue {
    type Result = ();

    fn handle(&mut self, msg: Enqueue, _ctx: &mut Self::Context) {
        if self
            .entries
            .iter()
            .any(|e| e.connection_id == msg.connection_id)
        {
            let _ = msg.tx.send(CoordinatorError::AlreadyQueued.to_ws_message());
            return;
        }

        let joined_at = Utc::now();
        {
            let mut registry = self.registry.lock().unwrap();
            let connection = registry.register(&msg.connection_id);
            match connection.status {
                ConnectionStatus::Idle => {}
                ConnectionStatus::Queued { .. } => {
                    let _ = msg.tx.send(CoordinatorError::AlreadyQueued.to_ws_message());
                    return;
                }
                ConnectionStatus::InLobby { .. } | ConnectionStatus::InBattle { .. } => {
                    let _ = msg.tx.send(CoordinatorError::AlreadyInLobby.to_ws_message());
                    return;
                }
            }
            if let Err(e) =
                registry.set_status(&msg.connection_id, ConnectionStatus::Queued { joined_at })
            {
                let _ = msg.tx.send(e.to_ws_message());
                return;
            }
        }

        println!("📥 Queued for matchmaking: connection_id={}", msg.connection_id);

        self.entries.push(QueueEntry {
            connection_id: msg.connection_id,
            display_name: msg.display_name,
            joined_at,
            preferences: msg.preferences,
            tx: msg.tx,
        });
        // joined_at昇順（同時刻は挿入順を維持）
        self.entries.sort_by_key(|e| e.joined_at);

        self.pair_waiting_entries();
    }
}

// メッセージ: キュー離脱（明示的な離脱と切断の両方から呼ばれる）
#[derive(Message)]
#[rtype(result = "()")]
pub struct Dequeue {
    pub connection_id: String,
}

impl Handler<Dequeue> for MatchQueue {
    type Result = ();

    fn handle(&mut self, msg: Dequeue, _ctx: &mut Self::Context) {
        let Some(index) = self
            .entries
            .iter()
            .position(|e| e.connection_id == msg.connection_id)
        else {
            // 既に離脱済み（冪等）
            return;
        };
        self.entries.remove(index);

        let _ = self
            .registry
            .lock()
            .unwrap()
            .set_status(&msg.connection_id, ConnectionStatus::Idle);

        println!("📤 Left matchmaking queue: connection_id={}", msg.connection_id);
    }
}
