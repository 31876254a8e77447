//! Match state and authoritative tick loop

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info};
use uuid::Uuid;

use crate::util::time::tick_period;
use crate::ws::protocol::{MatchSides, ServerMsg, Side};

use super::physics::{clamp_paddle_target, RallyState, SERVE_MAX_VY};

/// Rounds needed to take the series (best of 3)
pub const WIN_THRESHOLD: u32 = 2;
pub const BEST_OF: u32 = 3;

/// One seat in a match: a referenced connection, never owned
#[derive(Debug, Clone)]
pub struct MatchPlayer {
    pub conn_id: Uuid,
    pub name: String,
    /// Outbound channel of the owning connection
    pub tx: mpsc::Sender<ServerMsg>,
}

/// Commands delivered to a running match task
#[derive(Debug, Clone)]
pub enum MatchCmd {
    /// Commanded paddle target from a participant
    Input { conn_id: Uuid, target_y: f32 },
    /// A participant's connection closed
    Abort { leaver: Uuid },
}

/// Terminal report from a match task back to the matchmaker
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Finished {
        room_id: Uuid,
        winner: MatchSeat,
        loser: MatchSeat,
    },
    Aborted {
        room_id: Uuid,
        leaver: Uuid,
        remaining: MatchSeat,
    },
}

/// Identity of a participant as the matchmaker needs it after the match
#[derive(Debug, Clone)]
pub struct MatchSeat {
    pub conn_id: Uuid,
    pub name: String,
}

impl From<&MatchPlayer> for MatchSeat {
    fn from(p: &MatchPlayer) -> Self {
        Self {
            conn_id: p.conn_id,
            name: p.name.clone(),
        }
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub room_id: Uuid,
    /// Participant ids, index 0 = left, 1 = right
    pub players: [Uuid; 2],
    pub cmd_tx: mpsc::Sender<MatchCmd>,
}

impl MatchHandle {
    pub fn has_player(&self, conn_id: Uuid) -> bool {
        self.players.contains(&conn_id)
    }

    pub fn sides(&self) -> MatchSides {
        MatchSides {
            left_id: self.players[0],
            right_id: self.players[1],
        }
    }
}

/// The authoritative two-player match
pub struct GameMatch {
    room_id: Uuid,
    /// Fixed seating, index 0 = left, 1 = right
    players: [MatchPlayer; 2],
    rounds: [u32; 2],
    rally: RallyState,
    rng: ChaCha8Rng,
    tick: u64,
    cmd_rx: mpsc::Receiver<MatchCmd>,
    outcome_tx: mpsc::Sender<MatchOutcome>,
}

impl GameMatch {
    pub fn new(
        room_id: Uuid,
        players: [MatchPlayer; 2],
        seed: u64,
        outcome_tx: mpsc::Sender<MatchOutcome>,
    ) -> (Self, MatchHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let handle = MatchHandle {
            room_id,
            players: [players[0].conn_id, players[1].conn_id],
            cmd_tx,
        };

        let game_match = Self {
            room_id,
            players,
            rounds: [0, 0],
            rally: RallyState::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            tick: 0,
            cmd_rx,
            outcome_tx,
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop until the series concludes, a
    /// participant leaves, or the handle is dropped.
    pub async fn run(mut self) {
        info!(room_id = %self.room_id, "Match started");

        // Opening serve direction is the only coin flip of the match
        let opening = if self.rng.gen_bool(0.5) {
            Side::Left
        } else {
            Side::Right
        };
        let vy = self.rng.gen_range(-SERVE_MAX_VY..=SERVE_MAX_VY);
        self.rally.serve(opening, vy);

        let mut ticker = interval(tick_period());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match self.drain_commands().await {
                Flow::Continue => {}
                Flow::Stop => return,
            }

            self.tick += 1;
            let scored = self.rally.step();

            if let Some(scorer) = scored {
                if let Flow::Stop = self.record_round_win(scorer).await {
                    return;
                }
            }

            // Snapshot goes out every tick, unconditionally
            self.broadcast(self.snapshot());
        }
    }

    /// Drain pending commands without blocking the tick.
    async fn drain_commands(&mut self) -> Flow {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(MatchCmd::Input { conn_id, target_y }) => {
                    if let Some(idx) = self.seat_of(conn_id) {
                        self.rally.targets[idx] = clamp_paddle_target(target_y);
                    } else {
                        debug!(room_id = %self.room_id, conn_id = %conn_id, "Input from non-participant dropped");
                    }
                }
                Ok(MatchCmd::Abort { leaver }) => {
                    self.abort(leaver).await;
                    return Flow::Stop;
                }
                Err(mpsc::error::TryRecvError::Empty) => return Flow::Continue,
                // All handles dropped: the match was discarded, stop the timer
                Err(mpsc::error::TryRecvError::Disconnected) => return Flow::Stop,
            }
        }
    }

    /// Credit a round to `scorer` and either conclude the series or
    /// reset the rally toward the conceder.
    async fn record_round_win(&mut self, scorer: Side) -> Flow {
        let idx = scorer.index();
        self.rounds[idx] += 1;

        self.broadcast(ServerMsg::SeriesUpdate {
            best_of: BEST_OF,
            rounds: self.rounds_by_id(),
            names: self.names_by_id(),
        });

        if self.rounds[idx] >= WIN_THRESHOLD {
            let winner = &self.players[idx];
            let loser = &self.players[scorer.opposite().index()];

            info!(
                room_id = %self.room_id,
                winner = %winner.conn_id,
                loser = %loser.conn_id,
                "Series concluded"
            );

            self.broadcast(ServerMsg::MatchEnd {
                winner_id: winner.conn_id,
                loser_id: loser.conn_id,
                winner_name: winner.name.clone(),
                loser_name: loser.name.clone(),
            });

            let outcome = MatchOutcome::Finished {
                room_id: self.room_id,
                winner: winner.into(),
                loser: loser.into(),
            };
            // A terminal report may not be dropped; wait out backpressure
            let _ = self.outcome_tx.send(outcome).await;
            return Flow::Stop;
        }

        // Fresh serve toward whoever just conceded
        let vy = self.rng.gen_range(-SERVE_MAX_VY..=SERVE_MAX_VY);
        self.rally.serve(scorer.opposite(), vy);
        self.broadcast(ServerMsg::RoundNext);
        Flow::Continue
    }

    /// A participant disconnected; tell the opponent and report out.
    async fn abort(&mut self, leaver: Uuid) {
        let Some(leaver_idx) = self.seat_of(leaver) else {
            return;
        };
        let remaining = &self.players[1 - leaver_idx];

        info!(room_id = %self.room_id, leaver = %leaver, "Match aborted by disconnect");

        let _ = remaining.tx.try_send(ServerMsg::MatchOpponentLeft);
        let outcome = MatchOutcome::Aborted {
            room_id: self.room_id,
            leaver,
            remaining: remaining.into(),
        };
        let _ = self.outcome_tx.send(outcome).await;
    }

    fn snapshot(&self) -> ServerMsg {
        ServerMsg::StateUpdate {
            room_id: self.room_id,
            tick: self.tick,
            ball_x: self.rally.ball_x,
            ball_y: self.rally.ball_y,
            paddles: self.rally.paddles,
            rounds: self.rounds,
        }
    }

    fn broadcast(&self, msg: ServerMsg) {
        for player in &self.players {
            // A full or closed channel means the connection is on its
            // way out; disconnect cleanup handles the rest
            let _ = player.tx.try_send(msg.clone());
        }
    }

    fn seat_of(&self, conn_id: Uuid) -> Option<usize> {
        self.players.iter().position(|p| p.conn_id == conn_id)
    }

    fn rounds_by_id(&self) -> HashMap<Uuid, u32> {
        self.players
            .iter()
            .enumerate()
            .map(|(i, p)| (p.conn_id, self.rounds[i]))
            .collect()
    }

    fn names_by_id(&self) -> HashMap<Uuid, String> {
        self.players
            .iter()
            .map(|p| (p.conn_id, p.name.clone()))
            .collect()
    }
}

enum Flow {
    Continue,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(name: &str) -> (MatchPlayer, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(256);
        (
            MatchPlayer {
                conn_id: Uuid::new_v4(),
                name: name.to_string(),
                tx,
            },
            rx,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn test_match() -> (GameMatch, MatchHandle, [mpsc::Receiver<ServerMsg>; 2], mpsc::Receiver<MatchOutcome>) {
        let (left, left_rx) = seat("Ada");
        let (right, right_rx) = seat("Bo");
        let (outcome_tx, outcome_rx) = mpsc::channel(8);
        let (m, handle) = GameMatch::new(Uuid::new_v4(), [left, right], 7, outcome_tx);
        (m, handle, [left_rx, right_rx], outcome_rx)
    }

    #[tokio::test]
    async fn round_counters_are_monotone_and_terminal_at_threshold() {
        let (mut m, _handle, [mut lrx, _rrx], mut outcome_rx) = test_match();

        assert!(matches!(m.record_round_win(Side::Left).await, Flow::Continue));
        assert_eq!(m.rounds, [1, 0]);
        assert!(matches!(m.record_round_win(Side::Right).await, Flow::Continue));
        assert_eq!(m.rounds, [1, 1]);
        assert!(matches!(m.record_round_win(Side::Left).await, Flow::Stop));
        assert_eq!(m.rounds, [2, 1]);

        let msgs = drain(&mut lrx);
        let ends: Vec<_> = msgs
            .iter()
            .filter(|m| matches!(m, ServerMsg::MatchEnd { .. }))
            .collect();
        assert_eq!(ends.len(), 1, "match:end fires exactly once");

        match outcome_rx.try_recv().unwrap() {
            MatchOutcome::Finished { winner, loser, .. } => {
                assert_eq!(winner.name, "Ada");
                assert_eq!(loser.name, "Bo");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn below_threshold_round_resets_rally_toward_conceder() {
        let (mut m, _handle, [mut lrx, _rrx], _outcome_rx) = test_match();
        m.rally.ball_x = -100.0;

        assert!(matches!(m.record_round_win(Side::Right).await, Flow::Continue));
        // Ball re-centered, serve toward the left (conceding) side
        assert!(m.rally.vel_x < 0.0);
        assert!((m.rally.ball_x - crate::game::physics::FIELD_W / 2.0).abs() < f32::EPSILON);

        let msgs = drain(&mut lrx);
        assert!(msgs.iter().any(|m| matches!(m, ServerMsg::RoundNext)));
        assert!(msgs.iter().any(|m| matches!(m, ServerMsg::SeriesUpdate { .. })));
    }

    #[tokio::test]
    async fn input_from_non_participant_is_dropped() {
        let (mut m, handle, _rxs, _outcome_rx) = test_match();
        let before = m.rally.targets;

        handle
            .cmd_tx
            .try_send(MatchCmd::Input {
                conn_id: Uuid::new_v4(),
                target_y: 10.0,
            })
            .unwrap();
        assert!(matches!(m.drain_commands().await, Flow::Continue));
        assert_eq!(m.rally.targets, before);
    }

    #[tokio::test]
    async fn participant_input_is_clamped_into_paddle_range() {
        let (mut m, handle, _rxs, _outcome_rx) = test_match();
        let left_id = m.players[0].conn_id;

        handle
            .cmd_tx
            .try_send(MatchCmd::Input {
                conn_id: left_id,
                target_y: -9999.0,
            })
            .unwrap();
        assert!(matches!(m.drain_commands().await, Flow::Continue));
        let (lo, _) = crate::game::physics::paddle_y_range();
        assert_eq!(m.rally.targets[0], lo);
    }

    #[tokio::test]
    async fn abort_notifies_opponent_and_reports_remaining() {
        let (mut m, handle, [_lrx, mut rrx], mut outcome_rx) = test_match();
        let left_id = m.players[0].conn_id;

        handle
            .cmd_tx
            .try_send(MatchCmd::Abort { leaver: left_id })
            .unwrap();
        assert!(matches!(m.drain_commands().await, Flow::Stop));

        let msgs = drain(&mut rrx);
        assert!(msgs.iter().any(|m| matches!(m, ServerMsg::MatchOpponentLeft)));

        match outcome_rx.try_recv().unwrap() {
            MatchOutcome::Aborted { leaver, remaining, .. } => {
                assert_eq!(leaver, left_id);
                assert_eq!(remaining.name, "Bo");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn terminal_report_survives_a_full_outcome_channel() {
        let (left, _lrx) = seat("Ada");
        let (right, _rrx) = seat("Bo");
        let (outcome_tx, mut outcome_rx) = mpsc::channel(1);
        let (mut m, _handle) = GameMatch::new(Uuid::new_v4(), [left, right], 7, outcome_tx.clone());
        m.rounds = [1, 0];

        // Occupy the only slot so the report has to wait for the consumer
        outcome_tx
            .try_send(MatchOutcome::Aborted {
                room_id: Uuid::new_v4(),
                leaver: Uuid::new_v4(),
                remaining: MatchSeat {
                    conn_id: Uuid::new_v4(),
                    name: "X".to_string(),
                },
            })
            .unwrap();

        let task = tokio::spawn(async move { m.record_round_win(Side::Left).await });

        assert!(matches!(
            outcome_rx.recv().await,
            Some(MatchOutcome::Aborted { .. })
        ));
        match outcome_rx.recv().await {
            Some(MatchOutcome::Finished { winner, .. }) => assert_eq!(winner.name, "Ada"),
            other => panic!("expected a finished report, got {:?}", other),
        }
        assert!(matches!(task.await.unwrap(), Flow::Stop));
    }

    #[tokio::test]
    async fn dropped_handle_stops_the_tick_loop() {
        let (m, handle, _rxs, _outcome_rx) = test_match();
        let task = tokio::spawn(m.run());
        drop(handle);
        // The loop observes the closed command channel on its next tick
        tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("match task must stop once its handle is gone")
            .unwrap();
    }
}
