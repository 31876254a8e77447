//! Matchmaking service: per-connection session coordination plus the
//! admission policy that turns queue/hold state into running matches.
//!
//! All lobby mutations happen behind one `tokio::sync::Mutex`, so queue,
//! champion hold and the active-match slot always see a single writer.
//! Match tasks and hold-expiry timers talk back over channels; they never
//! touch the lobby directly.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::{GameMatch, MatchCmd, MatchOutcome, MatchPlayer};
use crate::game::r#match::{MatchHandle, BEST_OF};
use crate::social::{LeaderboardEntry, WinLedger};
use crate::util::time::unix_millis;
use crate::ws::protocol::{MatchPlayers, ServerMsg};

use super::queue::{Lobby, Pairing, QueuedPlayer};

/// How long a match winner is reserved before rejoining normal pairing
pub const DEFAULT_HOLD: Duration = Duration::from_secs(10);

/// Longest accepted chat line
const MAX_CHAT_LEN: usize = 200;

/// Matchmaking service
pub struct MatchmakingService {
    lobby: Mutex<Lobby>,
    /// Outbound channel per live connection
    connections: DashMap<Uuid, mpsc::Sender<ServerMsg>>,
    /// Running matches by room token
    registry: DashMap<Uuid, MatchHandle>,
    ledger: Mutex<WinLedger>,
    outcome_tx: mpsc::Sender<MatchOutcome>,
    expiry_tx: mpsc::Sender<u64>,
    hold_duration: Duration,
}

impl MatchmakingService {
    /// Build the service plus the receivers its [`run`](Self::run) loop
    /// consumes: terminal match outcomes and hold-expiry generations.
    pub fn new(
        hold_duration: Duration,
    ) -> (Self, mpsc::Receiver<MatchOutcome>, mpsc::Receiver<u64>) {
        let (outcome_tx, outcome_rx) = mpsc::channel(16);
        let (expiry_tx, expiry_rx) = mpsc::channel(16);
        let service = Self {
            lobby: Mutex::new(Lobby::new()),
            connections: DashMap::new(),
            registry: DashMap::new(),
            ledger: Mutex::new(WinLedger::new()),
            outcome_tx,
            expiry_tx,
            hold_duration,
        };
        (service, outcome_rx, expiry_rx)
    }

    /// Register a connection's outbound channel (WebSocket connected)
    pub fn register(&self, conn_id: Uuid, tx: mpsc::Sender<ServerMsg>) {
        self.connections.insert(conn_id, tx);
        info!(conn_id = %conn_id, "Connection registered");
    }

    /// Full disconnect cleanup: queue, champion hold and any match the
    /// connection was playing in. Safe to call for unknown handles.
    pub async fn disconnect(&self, conn_id: Uuid) {
        self.connections.remove(&conn_id);

        {
            let mut lobby = self.lobby.lock().await;
            lobby.remove(conn_id);
            lobby.disarm_champion(conn_id);
            self.broadcast_queue(&lobby);
        }

        // Forward to the match task, if any; a closed channel means the
        // match is already torn down and this is a no-op
        let handle = self
            .registry
            .iter()
            .find(|entry| entry.value().has_player(conn_id))
            .map(|entry| entry.value().clone());
        if let Some(handle) = handle {
            info!(conn_id = %conn_id, room_id = %handle.room_id, "Disconnect forwarded to running match");
            let _ = handle.cmd_tx.try_send(MatchCmd::Abort { leaver: conn_id });
        }

        info!(conn_id = %conn_id, "Connection closed");
        self.try_admit().await;
    }

    /// Enter the queue under a sanitized display name
    pub async fn join_queue(&self, conn_id: Uuid, name: String) {
        if self.in_match(conn_id) {
            debug!(conn_id = %conn_id, "Queue join ignored: already in a match");
            return;
        }

        {
            let mut lobby = self.lobby.lock().await;
            if lobby.champion().map(|h| h.conn_id) == Some(conn_id) {
                debug!(conn_id = %conn_id, "Queue join ignored: holds champion reservation");
                return;
            }
            if lobby.enqueue(QueuedPlayer::new(conn_id, name)) {
                info!(conn_id = %conn_id, queued = lobby.len(), "Joined queue");
            }
            self.broadcast_queue(&lobby);
        }

        self.try_admit().await;
    }

    pub async fn leave_queue(&self, conn_id: Uuid) {
        {
            let mut lobby = self.lobby.lock().await;
            if lobby.remove(conn_id).is_some() {
                info!(conn_id = %conn_id, queued = lobby.len(), "Left queue");
            }
            self.broadcast_queue(&lobby);
        }
        self.try_admit().await;
    }

    /// Route a paddle target to the owning room. Unknown rooms and
    /// non-participants are dropped silently.
    pub fn submit_input(&self, conn_id: Uuid, room_id: Uuid, target_y: f32) {
        if let Some(handle) = self.registry.get(&room_id) {
            let _ = handle.cmd_tx.try_send(MatchCmd::Input { conn_id, target_y });
        }
    }

    /// Relay lobby chat among currently queued connections. The
    /// per-sender cooldown is enforced at the session boundary.
    pub async fn chat(&self, conn_id: Uuid, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let text: String = text.chars().take(MAX_CHAT_LEN).collect();

        let lobby = self.lobby.lock().await;
        if !lobby.contains(conn_id) {
            debug!(conn_id = %conn_id, "Chat dropped: sender not queued");
            return;
        }
        let from = lobby
            .entry_name(conn_id)
            .unwrap_or_else(|| crate::ws::protocol::DEFAULT_NAME.to_string());
        let msg = ServerMsg::ChatMessage {
            from,
            text,
            at: unix_millis(),
        };
        for id in lobby.conn_ids() {
            self.send_to(id, msg.clone());
        }
    }

    /// Admission check: must run after every mutation that could change
    /// eligibility (join, leave, disconnect, match end, hold expiry).
    pub async fn try_admit(&self) {
        let mut lobby = self.lobby.lock().await;
        let now = Instant::now();

        if !lobby.can_admit(now) {
            self.broadcast_queue(&lobby);
            return;
        }
        let Some(pairing) = lobby.select_pairing(now) else {
            return;
        };

        let left_tx = self.sender_of(pairing.left.conn_id);
        let right_tx = self.sender_of(pairing.right.conn_id);

        let (left_tx, right_tx) = match (left_tx, right_tx) {
            (Some(l), Some(r)) => (l, r),
            (l, r) => {
                // A selected participant vanished between selection and
                // room assignment: put the survivor back at the front
                // and let the next trigger retry
                self.requeue_survivors(&mut lobby, &pairing, l.is_some(), r.is_some());
                self.broadcast_queue(&lobby);
                return;
            }
        };

        let room_id = Uuid::new_v4();
        let seed = rand::random::<u64>();
        let left = MatchPlayer {
            conn_id: pairing.left.conn_id,
            name: pairing.left.name.clone(),
            tx: left_tx,
        };
        let right = MatchPlayer {
            conn_id: pairing.right.conn_id,
            name: pairing.right.name.clone(),
            tx: right_tx,
        };

        let (game_match, handle) =
            GameMatch::new(room_id, [left, right], seed, self.outcome_tx.clone());
        self.registry.insert(room_id, handle.clone());
        lobby.set_active_match(room_id);

        info!(
            room_id = %room_id,
            left = %pairing.left.conn_id,
            right = %pairing.right.conn_id,
            via_hold = pairing.consumed_hold,
            "Match admitted"
        );

        tokio::spawn(game_match.run());

        let sides = handle.sides();
        self.send_to(
            pairing.left.conn_id,
            ServerMsg::MatchStart {
                room_id,
                opponent: pairing.right.name.clone(),
                players: MatchPlayers {
                    self_id: pairing.left.conn_id,
                    opp_id: pairing.right.conn_id,
                },
                sides: sides.clone(),
            },
        );
        self.send_to(
            pairing.right.conn_id,
            ServerMsg::MatchStart {
                room_id,
                opponent: pairing.left.name.clone(),
                players: MatchPlayers {
                    self_id: pairing.right.conn_id,
                    opp_id: pairing.left.conn_id,
                },
                sides,
            },
        );

        // Initial series state: 0-0
        let rounds = [(pairing.left.conn_id, 0), (pairing.right.conn_id, 0)]
            .into_iter()
            .collect();
        let names = [
            (pairing.left.conn_id, pairing.left.name.clone()),
            (pairing.right.conn_id, pairing.right.name.clone()),
        ]
        .into_iter()
        .collect();
        let series = ServerMsg::SeriesUpdate {
            best_of: BEST_OF,
            rounds,
            names,
        };
        self.send_to(pairing.left.conn_id, series.clone());
        self.send_to(pairing.right.conn_id, series);

        self.broadcast_queue(&lobby);
    }

    fn requeue_survivors(
        &self,
        lobby: &mut Lobby,
        pairing: &Pairing,
        left_live: bool,
        right_live: bool,
    ) {
        warn!(
            left = %pairing.left.conn_id,
            right = %pairing.right.conn_id,
            "Admission aborted: selected participant vanished"
        );
        if left_live {
            lobby.enqueue_front(pairing.left.clone());
        }
        if right_live {
            lobby.enqueue_front(pairing.right.clone());
        }
    }

    /// Consume terminal match outcomes and hold expiries. Runs for the
    /// life of the process.
    pub async fn run(
        &self,
        mut outcome_rx: mpsc::Receiver<MatchOutcome>,
        mut expiry_rx: mpsc::Receiver<u64>,
    ) {
        loop {
            tokio::select! {
                Some(outcome) = outcome_rx.recv() => self.handle_outcome(outcome).await,
                Some(generation) = expiry_rx.recv() => self.handle_hold_expired(generation).await,
                else => break,
            }
        }
    }

    async fn handle_outcome(&self, outcome: MatchOutcome) {
        match outcome {
            MatchOutcome::Finished {
                room_id,
                winner,
                loser,
            } => {
                if self.registry.remove(&room_id).is_none() {
                    debug!(room_id = %room_id, "Outcome for already-removed match");
                }
                self.ledger.lock().await.record(&winner.name);

                {
                    let mut lobby = self.lobby.lock().await;
                    lobby.clear_active_match(room_id);

                    // Winner stays: reserved against the next challenger
                    if self.connections.contains_key(&winner.conn_id) {
                        let generation =
                            lobby.arm_champion(winner.conn_id, winner.name, self.hold_duration);
                        self.spawn_hold_timer(generation);
                    }
                    // Loser rejoins the general pool at the back
                    if self.connections.contains_key(&loser.conn_id) {
                        lobby.enqueue(QueuedPlayer::new(loser.conn_id, loser.name));
                    }
                    self.broadcast_queue(&lobby);
                }

                self.try_admit().await;
            }
            MatchOutcome::Aborted {
                room_id,
                leaver,
                remaining,
            } => {
                if self.registry.remove(&room_id).is_none() {
                    debug!(room_id = %room_id, "Abort for already-removed match");
                }
                debug!(room_id = %room_id, leaver = %leaver, "Match torn down");

                {
                    let mut lobby = self.lobby.lock().await;
                    lobby.clear_active_match(room_id);
                    // The abandoned player goes to the front of the queue
                    if self.connections.contains_key(&remaining.conn_id) {
                        lobby.enqueue_front(QueuedPlayer::new(remaining.conn_id, remaining.name));
                    }
                    self.broadcast_queue(&lobby);
                }

                self.try_admit().await;
            }
        }
    }

    async fn handle_hold_expired(&self, generation: u64) {
        let holder = {
            let mut lobby = self.lobby.lock().await;
            lobby.mark_champion_eligible(generation)
        };
        // Stale generations (hold replaced or disarmed) fall through
        if let Some(conn_id) = holder {
            info!(conn_id = %conn_id, "Champion hold expired, back to normal pairing");
            self.send_to(conn_id, ServerMsg::WinnerTimeout);
            self.try_admit().await;
        }
    }

    fn spawn_hold_timer(&self, generation: u64) {
        let expiry_tx = self.expiry_tx.clone();
        let delay = self.hold_duration;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = expiry_tx.send(generation).await;
        });
    }

    /// Queue snapshot to every live connection
    fn broadcast_queue(&self, lobby: &Lobby) {
        let msg = ServerMsg::QueueUpdate {
            count: lobby.len(),
            names: lobby.names(),
        };
        for entry in self.connections.iter() {
            let _ = entry.value().try_send(msg.clone());
        }
    }

    pub fn send_to(&self, conn_id: Uuid, msg: ServerMsg) {
        if let Some(tx) = self.connections.get(&conn_id) {
            let _ = tx.try_send(msg);
        }
    }

    fn sender_of(&self, conn_id: Uuid) -> Option<mpsc::Sender<ServerMsg>> {
        self.connections.get(&conn_id).map(|entry| entry.value().clone())
    }

    fn in_match(&self, conn_id: Uuid) -> bool {
        self.registry
            .iter()
            .any(|entry| entry.value().has_player(conn_id))
    }

    pub async fn queue_size(&self) -> usize {
        self.lobby.lock().await.len()
    }

    pub fn active_matches(&self) -> usize {
        self.registry.len()
    }

    pub async fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.ledger.lock().await.top(limit)
    }
}
