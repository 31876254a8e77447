//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Which side of the field a match participant defends.
/// Index 0 = left, index 1 = right, fixed for the whole match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter the matchmaking queue under a display name
    QueueJoin {
        name: Option<String>,
    },

    /// Leave the matchmaking queue
    QueueLeave,

    /// Commanded paddle target for the next tick
    InputMove {
        room_id: Uuid,
        /// Desired paddle center Y in field coordinates
        target_y: f32,
    },

    /// Lobby chat, only accepted while queued
    ChatSend {
        text: String,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        conn_id: Uuid,
        server_time: u64,
    },

    /// Queue membership changed
    QueueUpdate {
        count: usize,
        names: Vec<String>,
    },

    /// A match has been formed for the recipient
    MatchStart {
        room_id: Uuid,
        /// Opponent display name
        opponent: String,
        players: MatchPlayers,
        sides: MatchSides,
    },

    /// Authoritative state snapshot, sent every tick
    StateUpdate {
        room_id: Uuid,
        tick: u64,
        /// Ball center position
        ball_x: f32,
        ball_y: f32,
        /// Paddle center Y positions, index 0 = left, 1 = right
        paddles: [f32; 2],
        /// Round counters, index 0 = left, 1 = right
        rounds: [u32; 2],
    },

    /// Series score changed
    SeriesUpdate {
        best_of: u32,
        rounds: HashMap<Uuid, u32>,
        names: HashMap<Uuid, String>,
    },

    /// New rally about to serve
    RoundNext,

    /// Series concluded
    MatchEnd {
        winner_id: Uuid,
        loser_id: Uuid,
        winner_name: String,
        loser_name: String,
    },

    /// Opponent disconnected mid-match
    MatchOpponentLeft,

    /// Champion hold expired; holder is back in normal pairing
    WinnerTimeout,

    /// Lobby chat relay
    ChatMessage {
        from: String,
        text: String,
        at: u64,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Participant identifiers from the recipient's point of view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPlayers {
    pub self_id: Uuid,
    pub opp_id: Uuid,
}

/// Fixed side assignment for a match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSides {
    pub left_id: Uuid,
    pub right_id: Uuid,
}

/// Maximum display name length on the wire
pub const MAX_NAME_LEN: usize = 18;

/// Fallback display name for empty or missing names
pub const DEFAULT_NAME: &str = "Player";

/// Trim, truncate and default a client-supplied display name.
pub fn sanitize_name(raw: Option<&str>) -> String {
    let trimmed = raw.unwrap_or("").trim();
    if trimmed.is_empty() {
        return DEFAULT_NAME.to_string();
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}
