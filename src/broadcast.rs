use crate::models::WsMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// 共有ブロードキャスター
pub type SharedBroadcaster = Arc<Mutex<RoomBroadcaster>>;

pub fn new_shared_broadcaster() -> SharedBroadcaster {
    Arc::new(Mutex::new(RoomBroadcaster::new()))
}

/// 論理ルームの識別子（ロビー or バトルルーム）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Lobby(String),
    Battle(Uuid),
}

/// ルーム単位のPub/Subファンアウト
/// room → (connection_id → sender)
#[derive(Default)]
pub struct RoomBroadcaster {
    rooms: HashMap<RoomKey, HashMap<String, mpsc::UnboundedSender<WsMessage>>>,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    pub fn subscribe(
        &mut self,
        room: RoomKey,
        connection_id: &str,
        tx: mpsc::UnboundedSender<WsMessage>,
    ) {
        self.rooms
            .entry(room)
            .or_default()
            .insert(connection_id.to_string(), tx);
    }

    pub fn unsubscribe(&mut self, room: &RoomKey, connection_id: &str) {
        if let Some(subscribers) = self.rooms.get_mut(room) {
            subscribers.remove(connection_id);
            if subscribers.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    /// 切断時の掃除（全ルームから購読解除）
    pub fn unsubscribe_all(&mut self, connection_id: &str) {
        for subscribers in self.rooms.values_mut() {
            subscribers.remove(connection_id);
        }
        self.rooms.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// 特定購読者のsenderを取得（バトルルームへの引き継ぎ用）
    pub fn sender(
        &self,
        room: &RoomKey,
        connection_id: &str,
    ) -> Option<mpsc::UnboundedSender<WsMessage>> {
        self.rooms
            .get(room)?
            .get(connection_id)
            .cloned()
    }

    /// ルームの全購読者へ配信（fire-and-forget）
    /// 一人への配信失敗は他の購読者への配信を止めない
    pub fn publish(&self, room: &RoomKey, message: &WsMessage) {
        let Some(subscribers) = self.rooms.get(room) else {
            return;
        };

        for (connection_id, tx) in subscribers {
            if tx.send(message.clone()).is_err() {
                println!(
                    "⚠️ Failed to deliver to subscriber {} in {:?}, skipping",
                    connection_id, room
                );
            }
        }
    }

    pub fn subscriber_count(&self, room: &RoomKey) -> usize {
        self.rooms.get(room).map_or(0, |s| s.len())
    }

    /// ルームごと破棄（終了したバトルの最終ブロードキャスト後に呼ぶ）
    pub fn remove_room(&mut self, room: &RoomKey) {
        self.rooms.remove(room);
    }
}
