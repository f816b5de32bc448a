use crate::models::{LobbyMember, LobbySnapshot, LobbySummary, MatchType};
use crate::utils::synthesize_ai_member;

/// ロビー設定（ステークティアごとに起動時に定義）
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    pub lobby_id: String,
    pub capacity: usize,
    pub min_quorum: usize,
    pub match_type: MatchType,
    pub stake_amount: u64,
}

/// ロビー本体
/// ロビーは長命で、マッチ開始後はリセットされるだけで破棄されない
pub struct Lobby {
    pub config: LobbyConfig,
    pub members: Vec<LobbyMember>,
    pub countdown: Option<u32>,
    /// このサイクルで既にAI補充を実施したか（補充は1サイクル1回まで）
    pub backfilled: bool,
}

impl Lobby {
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            config,
            members: Vec::new(),
            countdown: None,
            backfilled: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.lobby_id
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.config.capacity
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.members.iter().any(|m| m.connection_id == connection_id)
    }

    pub fn member_mut(&mut self, connection_id: &str) -> Option<&mut LobbyMember> {
        self.members
            .iter_mut()
            .find(|m| m.connection_id == connection_id)
    }

    /// メンバー追加（容量チェックは呼び出し側の責務）
    pub fn add_member(&mut self, member: LobbyMember) {
        self.members.push(member);
    }

    /// メンバー削除。居なければNone（冪等）
    pub fn remove_member(&mut self, connection_id: &str) -> Option<LobbyMember> {
        let index = self
            .members
            .iter()
            .position(|m| m.connection_id == connection_id)?;
        Some(self.members.remove(index))
    }

    pub fn human_count(&self) -> usize {
        self.members.iter().filter(|m| !m.is_ai).count()
    }

    pub fn quorum_met(&self) -> bool {
        self.members.len() >= self.config.min_quorum
    }

    pub fn all_ready(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.is_ready)
    }

    /// 満員かつ全員準備完了（カウントダウン開始条件）
    pub fn ready_for_launch(&self) -> bool {
        self.is_full() && self.quorum_met() && self.all_ready()
    }

    /// AI補充タイマーを張る条件
    /// フリーロビーで、定足数を満たし、現メンバー全員が準備完了、ただし満員未満
    pub fn wants_backfill(&self) -> bool {
        self.config.match_type == MatchType::Free
            && !self.backfilled
            && self.quorum_met()
            && self.all_ready()
            && !self.is_full()
    }

    /// 容量ちょうどまでAIメンバーを合成し、追加した分を返す
    pub fn fill_with_ai(&mut self) -> Vec<LobbyMember> {
        let mut added = Vec::new();
        let mut index = self.members.len();
        while self.members.len() < self.config.capacity {
            let ai = synthesize_ai_member(index);
            self.members.push(ai.clone());
            added.push(ai);
            index += 1;
        }
        added
    }

    /// マッチ開始後のリセット（メンバー・カウントダウン・補充フラグをクリア）
    pub fn reset(&mut self) -> Vec<LobbyMember> {
        self.countdown = None;
        self.backfilled = false;
        std::mem::take(&mut self.members)
    }

    pub fn snapshot(&self) -> LobbySnapshot {
        LobbySnapshot {
            lobby_id: self.config.lobby_id.clone(),
            capacity: self.config.capacity,
            min_quorum: self.config.min_quorum,
            match_type: self.config.match_type,
            stake_amount: self.config.stake_amount,
            members: self.members.clone(),
            countdown: self.countdown,
        }
    }

    pub fn summary(&self) -> LobbySummary {
        LobbySummary {
            lobby_id: self.config.lobby_id.clone(),
            capacity: self.config.capacity,
            min_quorum: self.config.min_quorum,
            match_type: self.config.match_type,
            stake_amount: self.config.stake_amount,
            member_count: self.members.len(),
        }
    }
}
