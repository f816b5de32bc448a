pub mod broadcast;
pub mod game;
pub mod handlers;
pub mod lobby;
pub mod matchmaking;
pub mod models;
pub mod registry;
pub mod utils;
