pub mod manager;
pub mod state;

pub use manager::LobbyManager;
pub use state::{Lobby, LobbyConfig};
