use crate::broadcast::{RoomKey, SharedBroadcaster};
use crate::game::manager::{AiParticipant, BattleManager, CreateRoom, HumanParticipant};
use crate::lobby::state::{Lobby, LobbyConfig};
use crate::models::{
    ConnectionStatus, CoordinatorError, LobbyMember, LobbySnapshot, LobbySummary, MatchType,
    WsMessage,
};
use crate::registry::SharedRegistry;
use actix::prelude::*;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 通常カウントダウンのティック数
const DEFAULT_COUNTDOWN_TICKS: u32 = 5;
/// AI補充後の短縮カウントダウンのティック数
const DEFAULT_BACKFILL_COUNTDOWN_TICKS: u32 = 3;
/// カウントダウン1ティックの間隔
const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
/// AI補充までの待機時間
const DEFAULT_BACKFILL_DELAY_SECS: u64 = 60;

/// タイマー設定（テストではミリ秒スケールに差し替える）
#[derive(Debug, Clone)]
pub struct LobbyTiming {
    pub countdown_ticks: u32,
    pub backfill_countdown_ticks: u32,
    pub tick_interval: Duration,
    pub backfill_delay: Duration,
}

impl Default for LobbyTiming {
    fn default() -> Self {
        Self {
            countdown_ticks: DEFAULT_COUNTDOWN_TICKS,
            backfill_countdown_ticks: DEFAULT_BACKFILL_COUNTDOWN_TICKS,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            backfill_delay: Duration::from_secs(DEFAULT_BACKFILL_DELAY_SECS),
        }
    }
}

/// ロビーマネージャーアクター
/// 全ロビーの所有者。カウントダウン・AI補充タイマーは自分のメールボックスへの
/// 遅延メッセージとして再投入される（タイマーコンテキストから直接状態を触らない）
pub struct LobbyManager {
    lobbies: HashMap<String, Lobby>,
    /// lobby_id → アクティブなカウントダウンのタイマーハンドル
    countdown_handles: HashMap<String, SpawnHandle>,
    /// lobby_id → アクティブなAI補充タイマーハンドル
    backfill_handles: HashMap<String, SpawnHandle>,
    timing: LobbyTiming,
    registry: SharedRegistry,
    broadcaster: SharedBroadcaster,
    battle_manager: Addr<BattleManager>,
}

impl LobbyManager {
    pub fn new(
        configs: Vec<LobbyConfig>,
        registry: SharedRegistry,
        broadcaster: SharedBroadcaster,
        battle_manager: Addr<BattleManager>,
    ) -> Self {
        let lobbies = configs
            .into_iter()
            .map(|config| (config.lobby_id.clone(), Lobby::new(config)))
            .collect();
        Self {
            lobbies,
            countdown_handles: HashMap::new(),
            backfill_handles: HashMap::new(),
            timing: LobbyTiming::default(),
            registry,
            broadcaster,
            battle_manager,
        }
    }

    pub fn with_timing(mut self, timing: LobbyTiming) -> Self {
        self.timing = timing;
        self
    }

    fn publish(&self, lobby_id: &str, message: WsMessage) {
        let key = RoomKey::Lobby(lobby_id.to_string());
        self.broadcaster.lock().unwrap().publish(&key, &message);
    }

    fn publish_snapshot(&self, lobby_id: &str) {
        if let Some(lobby) = self.lobbies.get(lobby_id) {
            self.publish(
                lobby_id,
                WsMessage::LobbyUpdated {
                    snapshot: lobby.snapshot(),
                    timestamp: Utc::now(),
                },
            );
        }
    }

    fn send_error(tx: &mpsc::UnboundedSender<WsMessage>, error: &CoordinatorError) {
        let _ = tx.send(error.to_ws_message());
    }

    /// カウントダウンを解除。実際に動いていた場合のみキャンセルイベントを配信
    fn cancel_countdown(&mut self, lobby_id: &str, ctx: &mut Context<Self>, broadcast: bool) {
        let Some(handle) = self.countdown_handles.remove(lobby_id) else {
            return;
        };
        ctx.cancel_future(handle);
        if let Some(lobby) = self.lobbies.get_mut(lobby_id) {
            lobby.countdown = None;
        }
        if broadcast {
            println!("🚫 Countdown cancelled: lobby_id={}", lobby_id);
            self.publish(
                lobby_id,
                WsMessage::CountdownCancelled {
                    lobby_id: lobby_id.to_string(),
                    timestamp: Utc::now(),
                },
            );
        }
    }

    fn cancel_backfill(&mut self, lobby_id: &str, ctx: &mut Context<Self>) {
        if let Some(handle) = self.backfill_handles.remove(lobby_id) {
            ctx.cancel_future(handle);
        }
    }

    /// 昇格判定。メンバーシップ・準備状態が変わるたびに呼ばれる
    /// ロビーごとにカウントダウンか補充タイマーのどちらか一方のみ。張る側が他方を解除する
    fn evaluate_promotion(&mut self, lobby_id: &str, ctx: &mut Context<Self>) {
        let (launch_ready, wants_backfill, backfilled) = match self.lobbies.get(lobby_id) {
            Some(lobby) => (lobby.ready_for_launch(), lobby.wants_backfill(), lobby.backfilled),
            None => return,
        };

        if launch_ready {
            self.cancel_backfill(lobby_id, ctx);
            if !self.countdown_handles.contains_key(lobby_id) {
                let ticks = if backfilled {
                    self.timing.backfill_countdown_ticks
                } else {
                    self.timing.countdown_ticks
                };
                if let Some(lobby) = self.lobbies.get_mut(lobby_id) {
                    lobby.countdown = Some(ticks);
                }
                println!(
                    "🚀 Countdown started: lobby_id={}, ticks={}",
                    lobby_id, ticks
                );
                self.publish(
                    lobby_id,
                    WsMessage::MatchStarting {
                        lobby_id: lobby_id.to_string(),
                        countdown: ticks,
                        timestamp: Utc::now(),
                    },
                );
                let handle = ctx.notify_later(
                    CountdownTick {
                        lobby_id: lobby_id.to_string(),
                    },
                    self.timing.tick_interval,
                );
                self.countdown_handles.insert(lobby_id.to_string(), handle);
            }
        } else if wants_backfill {
            self.cancel_countdown(lobby_id, ctx, true);
            if !self.backfill_handles.contains_key(lobby_id) {
                println!(
                    "⏳ Backfill timer armed: lobby_id={}, delay={:?}",
                    lobby_id, self.timing.backfill_delay
                );
                let handle = ctx.notify_later(
                    BackfillFire {
                        lobby_id: lobby_id.to_string(),
                    },
                    self.timing.backfill_delay,
                );
                self.backfill_handles.insert(lobby_id.to_string(), handle);
            }
        } else {
            self.cancel_countdown(lobby_id, ctx, true);
            self.cancel_backfill(lobby_id, ctx);
        }
    }

    /// カウントダウン満了。ロビーからバトルルームへ昇格させ、ロビーをリセットする
    fn launch_match(&mut self, lobby_id: &str) {
        let Some(lobby) = self.lobbies.get_mut(lobby_id) else {
            return;
        };

        let members = lobby.reset();
        let room_id = Uuid::new_v4();
        let key = RoomKey::Lobby(lobby_id.to_string());

        println!(
            "🎮 Launching match: lobby_id={}, room_id={}, members={}",
            lobby_id,
            room_id,
            members.len()
        );

        // 購読解除より先に開始通知を配る
        self.publish(
            lobby_id,
            WsMessage::MatchStarted {
                lobby_id: lobby_id.to_string(),
                room_id,
                timestamp: Utc::now(),
            },
        );

        let mut humans = Vec::new();
        let mut ais = Vec::new();
        for member in &members {
            if member.is_ai {
                ais.push(AiParticipant {
                    ai_id: member.connection_id.clone(),
                    display_name: member.display_name.clone(),
                });
            } else if let Some(tx) = self
                .broadcaster
                .lock()
                .unwrap()
                .sender(&key, &member.connection_id)
            {
                humans.push(HumanParticipant {
                    connection_id: member.connection_id.clone(),
                    display_name: member.display_name.clone(),
                    tx,
                });
            }
        }

        // ロビー参照をクリアしてからバトルマネージャーがInBattleを設定する
        {
            let mut registry = self.registry.lock().unwrap();
            for member in &members {
                if !member.is_ai {
                    let _ = registry.set_status(&member.connection_id, ConnectionStatus::Idle);
                }
            }
        }
        {
            let mut broadcaster = self.broadcaster.lock().unwrap();
            for member in &members {
                if !member.is_ai {
                    broadcaster.unsubscribe(&key, &member.connection_id);
                }
            }
        }

        self.battle_manager.do_send(CreateRoom {
            room_id,
            humans,
            ais,
        });
    }
}

impl Actor for LobbyManager {
    type Context = Context<Self>;
}

// メッセージ: ロビー参加
#[derive(Message)]
#[rtype(result = "()")]
pub struct JoinLobby {
    pub lobby_id: String,
    pub connection_id: String,
    pub display_name: String,
    pub tx: mpsc::UnboundedSender<WsMessage>,
}

impl Handler<JoinLobby> for LobbyManager {
    type Result = ();

    fn handle(&mut self, msg: JoinLobby, ctx: &mut Self::Context) {
        let Some(lobby) = self.lobbies.get(&msg.lobby_id) else {
            Self::send_error(&msg.tx, &CoordinatorError::LobbyNotFound(msg.lobby_id));
            return;
        };

        if lobby.is_full() {
            Self::send_error(&msg.tx, &CoordinatorError::LobbyFull(msg.lobby_id));
            return;
        }

        // レジストリ基準で多重所属を拒否
        {
            let mut registry = self.registry.lock().unwrap();
            let connection = registry.register(&msg.connection_id);
            match connection.status {
                ConnectionStatus::Idle => {}
                ConnectionStatus::Queued { .. } => {
                    Self::send_error(&msg.tx, &CoordinatorError::AlreadyQueued);
                    return;
                }
                ConnectionStatus::InLobby { .. } | ConnectionStatus::InBattle { .. } => {
                    Self::send_error(&msg.tx, &CoordinatorError::AlreadyInLobby);
                    return;
                }
            }
            if let Err(e) = registry.set_status(
                &msg.connection_id,
                ConnectionStatus::InLobby {
                    lobby_id: msg.lobby_id.clone(),
                },
            ) {
                Self::send_error(&msg.tx, &e);
                return;
            }
        }

        let member = LobbyMember::new(msg.connection_id.clone(), msg.display_name.clone());
        if let Some(lobby) = self.lobbies.get_mut(&msg.lobby_id) {
            lobby.add_member(member);
        }

        self.broadcaster.lock().unwrap().subscribe(
            RoomKey::Lobby(msg.lobby_id.clone()),
            &msg.connection_id,
            msg.tx.clone(),
        );

        println!(
            "👥 Player joined lobby: lobby_id={}, connection_id={}",
            msg.lobby_id, msg.connection_id
        );

        self.publish(
            &msg.lobby_id,
            WsMessage::PlayerJoinedLobby {
                lobby_id: msg.lobby_id.clone(),
                connection_id: msg.connection_id.clone(),
                display_name: msg.display_name,
                is_ai: false,
                timestamp: Utc::now(),
            },
        );
        self.publish_snapshot(&msg.lobby_id);

        self.evaluate_promotion(&msg.lobby_id, ctx);
    }
}

// メッセージ: ロビー退出（明示的な退出と切断の両方から呼ばれる）
#[derive(Message)]
#[rtype(result = "()")]
pub struct LeaveLobby {
    pub lobby_id: String,
    pub connection_id: String,
}

impl Handler<LeaveLobby> for LobbyManager {
    type Result = ();

    fn handle(&mut self, msg: LeaveLobby, ctx: &mut Self::Context) {
        let Some(lobby) = self.lobbies.get_mut(&msg.lobby_id) else {
            return;
        };

        // 居なければ何もしない（leaveとdisconnectのレースを冪等に吸収）
        if lobby.remove_member(&msg.connection_id).is_none() {
            return;
        }

        // 最後の人間が抜けたフリーロビーにAIを残さない
        if lobby.human_count() == 0 {
            lobby.members.clear();
            lobby.backfilled = false;
        }

        // 切断済みでレジストリに居ないこともある
        let _ = self
            .registry
            .lock()
            .unwrap()
            .set_status(&msg.connection_id, ConnectionStatus::Idle);

        self.broadcaster
            .lock()
            .unwrap()
            .unsubscribe(&RoomKey::Lobby(msg.lobby_id.clone()), &msg.connection_id);

        println!(
            "👋 Player left lobby: lobby_id={}, connection_id={}",
            msg.lobby_id, msg.connection_id
        );

        self.publish(
            &msg.lobby_id,
            WsMessage::PlayerLeftLobby {
                lobby_id: msg.lobby_id.clone(),
                connection_id: msg.connection_id,
                timestamp: Utc::now(),
            },
        );
        self.publish_snapshot(&msg.lobby_id);

        self.evaluate_promotion(&msg.lobby_id, ctx);
    }
}

// メッセージ: 準備完了フラグ更新
#[derive(Message)]
#[rtype(result = "()")]
pub struct SetReady {
    pub lobby_id: String,
    pub connection_id: String,
    pub ready: bool,
    /// 外部のステーク確認コラボレータが渡すフラグ。コーディネータ自身は検証しない
    pub stake_confirmed: bool,
    pub tx: mpsc::UnboundedSender<WsMessage>,
}

impl Handler<SetReady> for LobbyManager {
    type Result = ();

    fn handle(&mut self, msg: SetReady, ctx: &mut Self::Context) {
        let Some(lobby) = self.lobbies.get_mut(&msg.lobby_id) else {
            Self::send_error(&msg.tx, &CoordinatorError::LobbyNotFound(msg.lobby_id));
            return;
        };

        if !lobby.contains(&msg.connection_id) {
            Self::send_error(&msg.tx, &CoordinatorError::NotAParticipant);
            return;
        }

        // 賭けロビーはステーク確認済みでないと準備完了にできない
        if msg.ready && lobby.config.match_type == MatchType::Staked && !msg.stake_confirmed {
            Self::send_error(&msg.tx, &CoordinatorError::StakeNotConfirmed);
            return;
        }

        if let Some(member) = lobby.member_mut(&msg.connection_id) {
            member.is_ready = msg.ready;
        }

        println!(
            "📊 Ready status: lobby_id={}, connection_id={}, ready={}",
            msg.lobby_id, msg.connection_id, msg.ready
        );

        self.publish(
            &msg.lobby_id,
            WsMessage::PlayerReadyStatus {
                lobby_id: msg.lobby_id.clone(),
                connection_id: msg.connection_id,
                ready: msg.ready,
                timestamp: Utc::now(),
            },
        );
        self.publish_snapshot(&msg.lobby_id);

        self.evaluate_promotion(&msg.lobby_id, ctx);
    }
}

// メッセージ: ロビー状態取得
#[derive(Message)]
#[rtype(result = "Option<LobbySnapshot>")]
pub struct GetLobbyState {
    pub lobby_id: String,
}

impl Handler<GetLobbyState> for LobbyManager {
    type Result = MessageResult<GetLobbyState>;

    fn handle(&mut self, msg: GetLobbyState, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.lobbies.get(&msg.lobby_id).map(|l| l.snapshot()))
    }
}

// メッセージ: ロビー一覧取得
#[derive(Message)]
#[rtype(result = "Vec<LobbySummary>")]
pub struct ListLobbies;

impl Handler<ListLobbies> for LobbyManager {
    type Result = MessageResult<ListLobbies>;

    fn handle(&mut self, _msg: ListLobbies, _ctx: &mut Self::Context) -> Self::Result {
        let mut summaries: Vec<LobbySummary> =
            self.lobbies.values().map(|l| l.summary()).collect();
        summaries.sort_by(|a, b| a.lobby_id.cmp(&b.lobby_id));
        MessageResult(summaries)
    }
}

// 内部メッセージ: カウントダウンの1ティック
#[derive(Message)]
#[rtype(result = "()")]
struct CountdownTick {
    lobby_id: String,
}

impl Handler<CountdownTick> for LobbyManager {
    type Result = ();

    fn handle(&mut self, msg: CountdownTick, ctx: &mut Self::Context) {
        // 発火済みハンドルを破棄
        self.countdown_handles.remove(&msg.lobby_id);

        let Some(lobby) = self.lobbies.get_mut(&msg.lobby_id) else {
            return;
        };

        // 張った時点と発火時点の間にメンバーが抜けている可能性があるため再チェック
        if !lobby.ready_for_launch() {
            lobby.countdown = None;
            println!(
                "🚫 Countdown precondition broken at tick: lobby_id={}",
                msg.lobby_id
            );
            self.publish(
                &msg.lobby_id,
                WsMessage::CountdownCancelled {
                    lobby_id: msg.lobby_id.clone(),
                    timestamp: Utc::now(),
                },
            );
            self.evaluate_promotion(&msg.lobby_id, ctx);
            return;
        }

        let remaining = lobby.countdown.unwrap_or(0).saturating_sub(1);
        if remaining == 0 {
            self.launch_match(&msg.lobby_id);
        } else {
            lobby.countdown = Some(remaining);
            self.publish(
                &msg.lobby_id,
                WsMessage::MatchStarting {
                    lobby_id: msg.lobby_id.clone(),
                    countdown: remaining,
                    timestamp: Utc::now(),
                },
            );
            let handle = ctx.notify_later(
                CountdownTick {
                    lobby_id: msg.lobby_id.clone(),
                },
                self.timing.tick_interval,
            );
            self.countdown_handles.insert(msg.lobby_id, handle);
        }
    }
}

// 内部メッセージ: AI補充デッドライン満了
#[derive(Message)]
#[rtype(result = "()")]
struct BackfillFire {
    lobby_id: String,
}

impl Handler<BackfillFire> for LobbyManager {
    type Result = ();

    fn handle(&mut self, msg: BackfillFire, ctx: &mut Self::Context) {
        self.backfill_handles.remove(&msg.lobby_id);

        let Some(lobby) = self.lobbies.get_mut(&msg.lobby_id) else {
            return;
        };

        // 張った時点と発火時点の間に条件が崩れていたら何もしない
        if !lobby.wants_backfill() {
            println!(
                "⏳ Backfill skipped, precondition no longer holds: lobby_id={}",
                msg.lobby_id
            );
            return;
        }

        let added = lobby.fill_with_ai();
        lobby.backfilled = true;

        println!(
            "🤖 Backfilled lobby with AI: lobby_id={}, added={}",
            msg.lobby_id,
            added.len()
        );

        for ai in added {
            self.publish(
                &msg.lobby_id,
                WsMessage::PlayerJoinedLobby {
                    lobby_id: msg.lobby_id.clone(),
                    connection_id: ai.connection_id,
                    display_name: ai.display_name,
                    is_ai: true,
                    timestamp: Utc::now(),
                },
            );
        }
        self.publish_snapshot(&msg.lobby_id);

        // 満員になったので短縮カウントダウンが始まる
        self.evaluate_promotion(&msg.lobby_id, ctx);
    }
}
