pub mod manager;
pub mod state;

pub use manager::BattleManager;
pub use state::BattleSession;
