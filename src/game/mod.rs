//! Game simulation modules

pub mod r#match;
pub mod physics;

pub use r#match::{GameMatch, MatchCmd, MatchHandle, MatchOutcome, MatchPlayer, MatchSeat};
