use crate::models::LobbyMember;
use uuid::Uuid;

/// AI補充メンバーを生成（常に準備完了状態）
pub fn synthesize_ai_member(index: usize) -> LobbyMember {
    LobbyMember {
        connection_id: format!("ai-{}", Uuid::new_v4()),
        display_name: format!("AI Fighter {}", index + 1),
        is_ready: true,
        is_ai: true,
    }
}
