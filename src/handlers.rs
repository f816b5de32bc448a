pub mod lobbies;
pub mod websocket;

pub use lobbies::{get_lobby_state, list_lobbies};
pub use websocket::ws_handler;
