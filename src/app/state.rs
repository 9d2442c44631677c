//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::GameHandle;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Inbound queue and outboxes of the game loop
    pub game: GameHandle,
}

impl AppState {
    pub fn new(config: Config, game: GameHandle) -> Self {
        Self {
            config: Arc::new(config),
            game,
        }
    }
}
