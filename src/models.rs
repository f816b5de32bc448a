use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// 接続ステータス
// ロビー/ルームへの参照はバリアントが保持する（参照とステータスが食い違わないように）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConnectionStatus {
    Idle,
    Queued { joined_at: DateTime<Utc> },
    InLobby { lobby_id: String },
    InBattle { room_id: Uuid },
}

impl ConnectionStatus {
    /// ロビーまたはルームを占有しているか
    pub fn is_occupied(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::InLobby { .. } | ConnectionStatus::InBattle { .. }
        )
    }
}

// ライブ接続情報（コネクションレジストリが唯一の所有者）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub status: ConnectionStatus,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(id: String) -> Self {
        Self {
            id,
            status: ConnectionStatus::Idle,
            connected_at: Utc::now(),
        }
    }
}

// マッチ種別
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum MatchType {
    Free,   // 練習用（AI補充あり）
    Staked, // 賭けあり（ステーク確認必須）
}

// ロビーメンバー
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyMember {
    pub connection_id: String,
    pub display_name: String,
    pub is_ready: bool,
    pub is_ai: bool,
}

impl LobbyMember {
    pub fn new(connection_id: String, display_name: String) -> Self {
        Self {
            connection_id,
            display_name,
            is_ready: false,
            is_ai: false,
        }
    }
}

// ロビー状態のスナップショット（ブロードキャスト・API応答用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub lobby_id: String,
    pub capacity: usize,
    pub min_quorum: usize,
    pub match_type: MatchType,
    pub stake_amount: u64,
    pub members: Vec<LobbyMember>,
    pub countdown: Option<u32>,
}

// ロビー一覧表示用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbySummary {
    pub lobby_id: String,
    pub capacity: usize,
    pub min_quorum: usize,
    pub match_type: MatchType,
    pub stake_amount: u64,
    pub member_count: usize,
}

// 戦闘参加者の種別（人間 or AI）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum CombatantKind {
    Human { connection_id: String },
    Ai { ai_id: String },
}

impl CombatantKind {
    pub fn id(&self) -> &str {
        match self {
            CombatantKind::Human { connection_id } => connection_id,
            CombatantKind::Ai { ai_id } => ai_id,
        }
    }

    pub fn is_ai(&self) -> bool {
        matches!(self, CombatantKind::Ai { .. })
    }
}

// 戦闘参加者
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combatant {
    pub kind: CombatantKind,
    pub display_name: String,
    pub hp: i32,
    pub max_hp: i32,
    pub alive: bool,
}

impl Combatant {
    pub fn human(connection_id: String, display_name: String, hp: i32) -> Self {
        Self {
            kind: CombatantKind::Human { connection_id },
            display_name,
            hp,
            max_hp: hp,
            alive: true,
        }
    }

    pub fn ai(ai_id: String, display_name: String, hp: i32) -> Self {
        Self {
            kind: CombatantKind::Ai { ai_id },
            display_name,
            hp,
            max_hp: hp,
            alive: true,
        }
    }

    pub fn id(&self) -> &str {
        self.kind.id()
    }
}

// バトルルームのライフサイクル
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum BattleStatus {
    Starting,
    Active,
    Ended,
}

// バトル状態のスナップショット
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleSnapshot {
    pub room_id: Uuid,
    pub status: BattleStatus,
    pub combatants: Vec<Combatant>,
}

// アクション種別
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ActionKind {
    Attack,
    Special,
    Guard,
}

// アウトカム関数の戻り値（ダメージ計算は外部コラボレータの契約）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub damage_dealt: i32,
    pub effects: Vec<String>,
}

// マッチメイキングの希望条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchPreferences {
    pub stake_amount: Option<u64>,
}

// マッチ結果（永続化コラボレータ向けに送出される終端イベント）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub room_id: Uuid,
    pub participants: Vec<String>,
    pub winner_id: Option<String>,
    pub by_disconnect: bool,
    pub duration_ms: i64,
    pub finished_at: DateTime<Utc>,
}

// エラー分類（クライアントへの拒否イベントに載せるコード）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ErrorCode {
    NotFound,
    Conflict,
    PreconditionFailed,
}

// コーディネータのエラー体系
// どのエラーもプロセスを落とさず、発生元コネクションへの拒否イベントになる
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinatorError {
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),
    #[error("lobby not found: {0}")]
    LobbyNotFound(String),
    #[error("room not found: {0}")]
    RoomNotFound(Uuid),
    #[error("lobby is full: {0}")]
    LobbyFull(String),
    #[error("already in a lobby")]
    AlreadyInLobby,
    #[error("already in the matchmaking queue")]
    AlreadyQueued,
    #[error("connection {0} still occupies a lobby or room")]
    StatusConflict(String),
    #[error("stake is not confirmed for this staked lobby")]
    StakeNotConfirmed,
    #[error("battle is not active")]
    BattleNotActive,
    #[error("not a participant")]
    NotAParticipant,
    #[error("combatant is already defeated")]
    CombatantDefeated,
    #[error("no opponent available to target")]
    NoTargetAvailable,
}

impl CoordinatorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoordinatorError::ConnectionNotFound(_)
            | CoordinatorError::LobbyNotFound(_)
            | CoordinatorError::RoomNotFound(_) => ErrorCode::NotFound,
            CoordinatorError::LobbyFull(_)
            | CoordinatorError::AlreadyInLobby
            | CoordinatorError::AlreadyQueued
            | CoordinatorError::StatusConflict(_) => ErrorCode::Conflict,
            CoordinatorError::StakeNotConfirmed
            | CoordinatorError::BattleNotActive
            | CoordinatorError::NotAParticipant
            | CoordinatorError::CombatantDefeated
            | CoordinatorError::NoTargetAvailable => ErrorCode::PreconditionFailed,
        }
    }

    /// 発生元コネクションへ返す拒否イベント
    pub fn to_ws_message(&self) -> WsMessage {
        WsMessage::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

// HTTP APIのエラー応答
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

// WebSocketメッセージ種別
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    // クライアント→サーバー
    JoinLobby {
        lobby_id: String,
        display_name: Option<String>,
    },
    LeaveLobby {
        lobby_id: String,
    },
    GetLobbyState {
        lobby_id: String,
    },
    SetReady {
        lobby_id: String,
        ready: bool,
        #[serde(default)]
        stake_confirmed: bool,
    },
    JoinQueue {
        #[serde(default)]
        preferences: Option<MatchPreferences>,
    },
    LeaveQueue,
    SubmitAction {
        room_id: Uuid,
        action: ActionKind,
        #[serde(default)]
        target_id: Option<String>,
    },
    Spectate {
        room_id: Uuid,
    },

    // サーバー→クライアント
    Connected {
        connection_id: String,
        timestamp: DateTime<Utc>,
    },
    PlayerJoinedLobby {
        lobby_id: String,
        connection_id: String,
        display_name: String,
        is_ai: bool,
        timestamp: DateTime<Utc>,
    },
    PlayerLeftLobby {
        lobby_id: String,
        connection_id: String,
        timestamp: DateTime<Utc>,
    },
    PlayerReadyStatus {
        lobby_id: String,
        connection_id: String,
        ready: bool,
        timestamp: DateTime<Utc>,
    },
    LobbyUpdated {
        snapshot: LobbySnapshot,
        timestamp: DateTime<Utc>,
    },
    MatchStarting {
        lobby_id: String,
        countdown: u32,
        timestamp: DateTime<Utc>,
    },
    CountdownCancelled {
        lobby_id: String,
        timestamp: DateTime<Utc>,
    },
    MatchStarted {
        lobby_id: String,
        room_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    MatchFound {
        room_id: Uuid,
        opponent_id: String,
        is_first: bool,
        timestamp: DateTime<Utc>,
    },
    ActionResult {
        room_id: Uuid,
        actor_id: String,
        target_id: String,
        action: ActionKind,
        damage_dealt: i32,
        target_hp: i32,
        effects: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    StateUpdate {
        state: BattleSnapshot,
        timestamp: DateTime<Utc>,
    },
    MatchEnded {
        room_id: Uuid,
        winner_id: Option<String>,
        by_disconnect: bool,
        timestamp: DateTime<Utc>,
    },
    OpponentDisconnected {
        room_id: Uuid,
        connection_id: String,
        timestamp: DateTime<Utc>,
    },
    SpectateError {
        room_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // エラー
    Error {
        code: ErrorCode,
        message: String,
    },
}
