//! Matchmaking: lobby state and the session/admission service

pub mod queue;
pub mod service;

pub use queue::{Lobby, QueuedPlayer};
pub use service::{MatchmakingService, DEFAULT_HOLD};
