use crate::models::{ActionKind, BattleSnapshot, BattleStatus, Combatant, Outcome};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 開始時HP
pub const STARTING_HP: i32 = 3;

/// アウトカム関数（ダメージ計算は外部コラボレータの契約で、ここでは差し替え可能な純関数）
pub type OutcomeResolver = fn(&ActionKind, &Combatant, &Combatant) -> Outcome;

/// 既定のアウトカム関数
pub fn default_resolver(action: &ActionKind, _actor: &Combatant, _target: &Combatant) -> Outcome {
    let damage_dealt = match action {
        ActionKind::Attack => 1,
        ActionKind::Special => 2,
        ActionKind::Guard => 0,
    };
    Outcome {
        damage_dealt,
        effects: Vec::new(),
    }
}

/// 1試合分の権威ある状態
pub struct BattleSession {
    pub room_id: Uuid,
    pub combatants: Vec<Combatant>,
    pub status: BattleStatus,
    pub started_at: DateTime<Utc>,
    pub last_action_at: Option<DateTime<Utc>>,
}

impl BattleSession {
    pub fn new(room_id: Uuid, combatants: Vec<Combatant>) -> Self {
        Self {
            room_id,
            combatants,
            status: BattleStatus::Starting,
            started_at: Utc::now(),
            last_action_at: None,
        }
    }

    pub fn activate(&mut self) {
        self.status = BattleStatus::Active;
    }

    pub fn is_participant(&self, id: &str) -> bool {
        self.combatants.iter().any(|c| c.id() == id)
    }

    pub fn combatant(&self, id: &str) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.id() == id)
    }

    pub fn combatant_mut(&mut self, id: &str) -> Option<&mut Combatant> {
        self.combatants.iter_mut().find(|c| c.id() == id)
    }

    /// ターゲット指定がない場合の既定ターゲット（自分以外で最初に生きている相手）
    pub fn default_target(&self, actor_id: &str) -> Option<String> {
        self.combatants
            .iter()
            .find(|c| c.alive && c.id() != actor_id)
            .map(|c| c.id().to_string())
    }

    /// アウトカムを適用。HPは[0, max_hp]にクランプし、0で撃破
    pub fn apply_outcome(&mut self, target_id: &str, outcome: &Outcome) {
        if let Some(target) = self.combatant_mut(target_id) {
            target.hp = (target.hp - outcome.damage_dealt).clamp(0, target.max_hp);
            if target.hp == 0 {
                target.alive = false;
            }
        }
        self.last_action_at = Some(Utc::now());
    }

    /// 撃破扱いにする（切断処理用）
    pub fn eliminate(&mut self, id: &str) {
        if let Some(combatant) = self.combatant_mut(id) {
            combatant.hp = 0;
            combatant.alive = false;
        }
    }

    pub fn alive_count(&self) -> usize {
        self.combatants.iter().filter(|c| c.alive).count()
    }

    /// 生存者が一人ならその勝者。全滅なら勝者なし
    pub fn sole_survivor(&self) -> Option<&Combatant> {
        let mut alive = self.combatants.iter().filter(|c| c.alive);
        let first = alive.next()?;
        if alive.next().is_none() {
            Some(first)
        } else {
            None
        }
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.combatants.iter().map(|c| c.id().to_string()).collect()
    }

    pub fn snapshot(&self) -> BattleSnapshot {
        BattleSnapshot {
            room_id: self.room_id,
            status: self.status,
            combatants: self.combatants.clone(),
        }
    }
}
