//! Lobby-adjacent surface: rolling win-count leaderboard.
//!
//! Wins are kept in memory for a 24 hour window keyed by display name;
//! nothing here persists across restarts.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::util::time::unix_millis;

/// Window length for counted wins
pub const WINDOW_MILLIS: u64 = 24 * 60 * 60 * 1000;

/// Leaderboard row on the wire
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub wins: u32,
}

/// Rolling 24-hour win ledger
#[derive(Debug, Default)]
pub struct WinLedger {
    /// (recorded-at millis, winner name), oldest first
    wins: VecDeque<(u64, String)>,
}

impl WinLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, winner_name: &str) {
        self.record_at(unix_millis(), winner_name);
    }

    fn record_at(&mut self, now: u64, winner_name: &str) {
        self.prune(now);
        self.wins.push_back((now, winner_name.to_string()));
    }

    /// Win counts inside the window, highest first, name as tiebreak
    pub fn top(&mut self, limit: usize) -> Vec<LeaderboardEntry> {
        self.top_at(unix_millis(), limit)
    }

    fn top_at(&mut self, now: u64, limit: usize) -> Vec<LeaderboardEntry> {
        self.prune(now);
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for (_, name) in &self.wins {
            *counts.entry(name.as_str()).or_default() += 1;
        }
        let mut entries: Vec<LeaderboardEntry> = counts
            .into_iter()
            .map(|(name, wins)| LeaderboardEntry {
                name: name.to_string(),
                wins,
            })
            .collect();
        entries.sort_by(|a, b| b.wins.cmp(&a.wins).then_with(|| a.name.cmp(&b.name)));
        entries.truncate(limit);
        entries
    }

    fn prune(&mut self, now: u64) {
        let cutoff = now.saturating_sub(WINDOW_MILLIS);
        while let Some((at, _)) = self.wins.front() {
            if *at < cutoff {
                self.wins.pop_front();
            } else {
                break;
            }
        }
    }
}
