//! Application state shared across routes

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::game::MatchOutcome;
use crate::matchmaking::{MatchmakingService, DEFAULT_HOLD};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub matchmaking: Arc<MatchmakingService>,
}

impl AppState {
    /// Build the state plus the receivers the matchmaking run loop
    /// consumes (spawned from main).
    pub fn new(config: Config) -> (Self, mpsc::Receiver<MatchOutcome>, mpsc::Receiver<u64>) {
        let (matchmaking, outcome_rx, expiry_rx) = MatchmakingService::new(DEFAULT_HOLD);
        let state = Self {
            config: Arc::new(config),
            matchmaking: Arc::new(matchmaking),
        };
        (state, outcome_rx, expiry_rx)
    }
}
