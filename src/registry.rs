use crate::models::{Connection, ConnectionStatus, CoordinatorError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// 共有コネクションレジストリ
pub type SharedRegistry = Arc<Mutex<ConnectionRegistry>>;

pub fn new_shared_registry() -> SharedRegistry {
    Arc::new(Mutex::new(ConnectionRegistry::new()))
}

/// 接続ステータスの唯一の所有者
/// 他コンポーネントはIDで参照し、読み書きは必ずここを通す
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// 接続を登録（冪等）。既存ならそのまま返す
    pub fn register(&mut self, connection_id: &str) -> Connection {
        self.connections
            .entry(connection_id.to_string())
            .or_insert_with(|| Connection::new(connection_id.to_string()))
            .clone()
    }

    pub fn get(&self, connection_id: &str) -> Option<Connection> {
        self.connections.get(connection_id).cloned()
    }

    /// ステータス更新
    /// ロビー/ルーム占有中に別の占有状態へ直接遷移することは禁止
    /// （呼び出し側が同一クリティカルセクション内でIdleに戻してから設定する）
    pub fn set_status(
        &mut self,
        connection_id: &str,
        status: ConnectionStatus,
    ) -> Result<(), CoordinatorError> {
        let connection = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| CoordinatorError::ConnectionNotFound(connection_id.to_string()))?;

        if connection.status.is_occupied() && status.is_occupied() {
            return Err(CoordinatorError::StatusConflict(connection_id.to_string()));
        }

        connection.status = status;
        Ok(())
    }

    /// 接続を削除し、最後の状態を返す
    /// 切断は明示的な退出とレースするため、既に無ければ黙ってNone
    pub fn deregister(&mut self, connection_id: &str) -> Option<Connection> {
        self.connections.remove(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
