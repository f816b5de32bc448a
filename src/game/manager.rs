use crate::broadcast::{RoomKey, SharedBroadcaster};
use crate::game::state::{default_resolver, BattleSession, OutcomeResolver, STARTING_HP};
use crate::models::{
    BattleStatus, Combatant, ConnectionStatus, CoordinatorError, MatchResult, WsMessage,
};
use crate::registry::SharedRegistry;
use actix::prelude::*;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// ルーム作成時の人間参加者（senderごと引き継ぐ）
pub struct HumanParticipant {
    pub connection_id: String,
    pub display_name: String,
    pub tx: mpsc::UnboundedSender<WsMessage>,
}

/// ルーム作成時のAI参加者
pub struct AiParticipant {
    pub ai_id: String,
    pub display_name: String,
}

/// バトルセッションマネージャーアクター
/// 全バトルルームの所有者。同一ルームのアクションはメールボックス到着順に直列処理される
pub struct BattleManager {
    rooms: HashMap<Uuid, BattleSession>,
    registry: SharedRegistry,
    broadcaster: SharedBroadcaster,
    resolver: OutcomeResolver,
    /// 終端イベントの送出先（永続化コラボレータ）
    result_tx: mpsc::UnboundedSender<MatchResult>,
}

impl BattleManager {
    pub fn new(
        registry: SharedRegistry,
        broadcaster: SharedBroadcaster,
        result_tx: mpsc::UnboundedSender<MatchResult>,
    ) -> Self {
        Self {
            rooms: HashMap::new(),
            registry,
            broadcaster,
            resolver: default_resolver,
            result_tx,
        }
    }

    /// アウトカム関数の差し替え（外部コラボレータ）
    pub fn with_resolver(mut self, resolver: OutcomeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    fn publish(&self, room_id: Uuid, message: WsMessage) {
        let key = RoomKey::Battle(room_id);
        self.broadcaster.lock().unwrap().publish(&key, &message);
    }

    fn publish_state(&self, room_id: Uuid) {
        if let Some(session) = self.rooms.get(&room_id) {
            self.publish(
                room_id,
                WsMessage::StateUpdate {
                    state: session.snapshot(),
                    timestamp: Utc::now(),
                },
            );
        }
    }

    fn send_error(tx: &mpsc::UnboundedSender<WsMessage>, error: &CoordinatorError) {
        let _ = tx.send(error.to_ws_message());
    }

    /// 参加者を離脱扱いにする。生存者が1以下に落ちたらフォーフィットで終了
    fn disconnect_participant(&mut self, room_id: Uuid, connection_id: &str) {
        let Some(session) = self.rooms.get_mut(&room_id) else {
            return;
        };
        if session.status != BattleStatus::Active || !session.is_participant(connection_id) {
            return;
        }

        println!(
            "🔌 Participant disconnected from battle: room_id={}, connection_id={}",
            room_id, connection_id
        );

        session.eliminate(connection_id);

        self.broadcaster
            .lock()
            .unwrap()
            .unsubscribe(&RoomKey::Battle(room_id), connection_id);

        self.publish(
            room_id,
            WsMessage::OpponentDisconnected {
                room_id,
                connection_id: connection_id.to_string(),
                timestamp: Utc::now(),
            },
        );

        let alive = self.rooms.get(&room_id).map_or(0, |s| s.alive_count());
        if alive <= 1 {
            // 残った相手の勝ち
            self.end_room(room_id, true);
        } else {
            self.publish_state(room_id);
        }
    }

    /// ルーム終了。終了は一度きりで、最終ブロードキャスト後にルームはテーブルから消える
    fn end_room(&mut self, room_id: Uuid, by_disconnect: bool) {
        let Some(mut session) = self.rooms.remove(&room_id) else {
            return;
        };
        session.status = BattleStatus::Ended;

        let winner_id = session.sole_survivor().map(|c| c.id().to_string());
        let finished_at = Utc::now();
        let duration_ms = finished_at
            .signed_duration_since(session.started_at)
            .num_milliseconds();

        println!(
            "🏁 Battle ended: room_id={}, winner={:?}, by_disconnect={}",
            room_id, winner_id, by_disconnect
        );

        self.publish(
            room_id,
            WsMessage::MatchEnded {
                room_id,
                winner_id: winner_id.clone(),
                by_disconnect,
                timestamp: finished_at,
            },
        );

        // 人間参加者をIdleへ戻す（切断済みならNotFoundになるだけ）
        {
            let mut registry = self.registry.lock().unwrap();
            for combatant in &session.combatants {
                if !combatant.kind.is_ai() {
                    let _ = registry.set_status(combatant.id(), ConnectionStatus::Idle);
                }
            }
        }

        let result = MatchResult {
            room_id,
            participants: session.participant_ids(),
            winner_id,
            by_disconnect,
            duration_ms,
            finished_at,
        };
        if self.result_tx.send(result).is_err() {
            println!("⚠️ Match result listener is gone: room_id={}", room_id);
        }

        self.broadcaster
            .lock()
            .unwrap()
            .remove_room(&RoomKey::Battle(room_id));
    }
}

impl Actor for BattleManager {
    type Context = Context<Self>;
}

// メッセージ: ルーム作成（ロビー昇格 or マッチメイキング成立から）
#[derive(Message)]
#[rtype(result = "()")]
pub struct CreateRoom {
    pub room_id: Uuid,
    pub humans: Vec<HumanParticipant>,
    pub ais: Vec<AiParticipant>,
}

impl Handler<CreateRoom> for BattleManager {
    type Result = ();

    fn handle(&mut self, msg: CreateRoom, _ctx: &mut Self::Context) {
        let mut combatants = Vec::new();
        for human in &msg.humans {
            combatants.push(Combatant::human(
                human.connection_id.clone(),
                human.display_name.clone(),
                STARTING_HP,
            ));
        }
        for ai in &msg.ais {
            combatants.push(Combatant::ai(
                ai.ai_id.clone(),
                ai.display_name.clone(),
                STARTING_HP,
            ));
        }

        let mut session = BattleSession::new(msg.room_id, combatants);

        {
            let mut broadcaster = self.broadcaster.lock().unwrap();
            for human in &msg.humans {
                broadcaster.subscribe(
                    RoomKey::Battle(msg.room_id),
                    &human.connection_id,
                    human.tx.clone(),
                );
            }
        }
        // マッチ成立とルーム作成の間に切断した接続はレジストリから消えている。
        // そのまま戦闘員にはせず、作成直後に離脱扱いへ回す
        let mut ghosts = Vec::new();
        {
            let mut registry = self.registry.lock().unwrap();
            for human in &msg.humans {
                if registry.get(&human.connection_id).is_none() {
                    ghosts.push(human.connection_id.clone());
                    continue;
                }
                if let Err(e) = registry.set_status(
                    &human.connection_id,
                    ConnectionStatus::InBattle {
                        room_id: msg.room_id,
                    },
                ) {
                    println!("⚠️ Could not mark {} InBattle: {}", human.connection_id, e);
                }
            }
        }

        // Starting→Activeへ即時遷移し、初期状態を配る
        session.activate();
        self.rooms.insert(msg.room_id, session);

        println!(
            "🎮 Battle room created: room_id={}, humans={}, ais={}",
            msg.room_id,
            msg.humans.len(),
            msg.ais.len()
        );

        self.publish_state(msg.room_id);

        for connection_id in ghosts {
            self.disconnect_participant(msg.room_id, &connection_id);
        }
    }
}

// メッセージ: アクション送信
#[derive(Message)]
#[rtype(result = "()")]
pub struct SubmitAction {
    pub room_id: Uuid,
    pub connection_id: String,
    pub action: crate::models::ActionKind,
    pub target_id: Option<String>,
    pub tx: mpsc::UnboundedSender<WsMessage>,
}

impl Handler<SubmitAction> for BattleManager {
    type Result = ();

    fn handle(&mut self, msg: SubmitAction, _ctx: &mut Self::Context) {
        let Some(session) = self.rooms.get(&msg.room_id) else {
            Self::send_error(&msg.tx, &CoordinatorError::RoomNotFound(msg.room_id));
            return;
        };

        if session.status != BattleStatus::Active {
            Self::send_error(&msg.tx, &CoordinatorError::BattleNotActive);
            return;
        }

        let Some(actor) = session.combatant(&msg.connection_id) else {
            Self::send_error(&msg.tx, &CoordinatorError::NotAParticipant);
            return;
        };
        if !actor.alive {
            Self::send_error(&msg.tx, &CoordinatorError::CombatantDefeated);
            return;
        }

        // ターゲットヒントを検証し、無指定なら既定ターゲット
        let target_id = match &msg.target_id {
            Some(id) => match session.combatant(id) {
                Some(target) if target.alive => id.clone(),
                _ => {
                    Self::send_error(&msg.tx, &CoordinatorError::NotAParticipant);
                    return;
                }
            },
            None => match session.default_target(&msg.connection_id) {
                Some(id) => id,
                None => {
                    Self::send_error(&msg.tx, &CoordinatorError::NoTargetAvailable);
                    return;
                }
            },
        };

        let target = match session.combatant(&target_id) {
            Some(t) => t,
            None => return,
        };
        let outcome = (self.resolver)(&msg.action, actor, target);

        let session = match self.rooms.get_mut(&msg.room_id) {
            Some(s) => s,
            None => return,
        };
        session.apply_outcome(&target_id, &outcome);
        let target_hp = session.combatant(&target_id).map_or(0, |t| t.hp);

        if session.alive_count() <= 1 {
            self.end_room(msg.room_id, false);
            return;
        }

        self.publish(
            msg.room_id,
            WsMessage::ActionResult {
                room_id: msg.room_id,
                actor_id: msg.connection_id,
                target_id,
                action: msg.action,
                damage_dealt: outcome.damage_dealt,
                target_hp,
                effects: outcome.effects,
                timestamp: Utc::now(),
            },
        );
        self.publish_state(msg.room_id);
    }
}

// メッセージ: 参加者の切断
#[derive(Message)]
#[rtype(result = "()")]
pub struct HandleDisconnect {
    pub room_id: Uuid,
    pub connection_id: String,
}

impl Handler<HandleDisconnect> for BattleManager {
    type Result = ();

    fn handle(&mut self, msg: HandleDisconnect, _ctx: &mut Self::Context) {
        // 既に終了・削除済み、または非参加者なら何もしない
        self.disconnect_participant(msg.room_id, &msg.connection_id);
    }
}

// メッセージ: 観戦
#[derive(Message)]
#[rtype(result = "()")]
pub struct Spectate {
    pub room_id: Uuid,
    pub connection_id: String,
    pub tx: mpsc::UnboundedSender<WsMessage>,
}

impl Handler<Spectate> for BattleManager {
    type Result = ();

    fn handle(&mut self, msg: Spectate, _ctx: &mut Self::Context) {
        let Some(session) = self.rooms.get(&msg.room_id) else {
            let _ = msg.tx.send(WsMessage::SpectateError {
                room_id: msg.room_id,
                reason: "room not found".to_string(),
                timestamp: Utc::now(),
            });
            return;
        };

        let snapshot = session.snapshot();
        self.broadcaster.lock().unwrap().subscribe(
            RoomKey::Battle(msg.room_id),
            &msg.connection_id,
            msg.tx.clone(),
        );

        println!(
            "👀 Spectator joined: room_id={}, connection_id={}",
            msg.room_id, msg.connection_id
        );

        let _ = msg.tx.send(WsMessage::StateUpdate {
            state: snapshot,
            timestamp: Utc::now(),
        });
    }
}
