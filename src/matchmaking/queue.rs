//! Lobby aggregate: waiting queue, champion hold and the active-match
//! slot, with the pure admission policy. No I/O and no timers here, so
//! every transition is unit-testable with a fresh `Lobby` per test.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Player waiting in the queue
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    pub conn_id: Uuid,
    pub name: String,
}

impl QueuedPlayer {
    pub fn new(conn_id: Uuid, name: String) -> Self {
        Self { conn_id, name }
    }
}

/// "Winner stays" reservation for the next match.
///
/// The generation counter ties the one-shot expiry timer to this
/// particular hold; a timer firing after the hold was replaced or
/// disarmed sees a stale generation and does nothing.
#[derive(Debug, Clone)]
pub struct ChampionHold {
    pub conn_id: Uuid,
    pub name: String,
    pub eligible_at: Instant,
    pub generation: u64,
    /// Set once the expiry timer fires; from then on the holder takes
    /// part in normal admission
    pub eligible: bool,
}

impl ChampionHold {
    pub fn is_eligible(&self, now: Instant) -> bool {
        self.eligible || now >= self.eligible_at
    }
}

/// The pairing selected by an admission check, left seat first
#[derive(Debug, Clone)]
pub struct Pairing {
    pub left: QueuedPlayer,
    pub right: QueuedPlayer,
    /// True when the left seat consumed the champion hold
    pub consumed_hold: bool,
}

/// Process-wide matchmaking state, single writer context
#[derive(Debug, Default)]
pub struct Lobby {
    queue: VecDeque<QueuedPlayer>,
    champion: Option<ChampionHold>,
    active_match: Option<Uuid>,
    hold_generation: u64,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless the handle is already queued (idempotent join).
    /// Returns false on a duplicate.
    pub fn enqueue(&mut self, player: QueuedPlayer) -> bool {
        if self.contains(player.conn_id) {
            return false;
        }
        self.queue.push_back(player);
        true
    }

    /// Reinsert at the front (a surviving player after a match ends)
    pub fn enqueue_front(&mut self, player: QueuedPlayer) {
        if !self.contains(player.conn_id) {
            self.queue.push_front(player);
        }
    }

    /// Remove the handle wherever it sits; no-op when absent
    pub fn remove(&mut self, conn_id: Uuid) -> Option<QueuedPlayer> {
        let pos = self.queue.iter().position(|p| p.conn_id == conn_id)?;
        self.queue.remove(pos)
    }

    pub fn contains(&self, conn_id: Uuid) -> bool {
        self.queue.iter().any(|p| p.conn_id == conn_id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.queue.iter().map(|p| p.name.clone()).collect()
    }

    pub fn conn_ids(&self) -> Vec<Uuid> {
        self.queue.iter().map(|p| p.conn_id).collect()
    }

    /// Display name of a queued handle, if present
    pub fn entry_name(&self, conn_id: Uuid) -> Option<String> {
        self.queue
            .iter()
            .find(|p| p.conn_id == conn_id)
            .map(|p| p.name.clone())
    }

    /// Arm the champion hold, replacing any existing one. The holder
    /// must not be queued at the same time. Returns the generation the
    /// expiry timer must present to act.
    pub fn arm_champion(&mut self, conn_id: Uuid, name: String, hold: Duration) -> u64 {
        self.remove(conn_id);
        self.hold_generation += 1;
        self.champion = Some(ChampionHold {
            conn_id,
            name,
            eligible_at: Instant::now() + hold,
            generation: self.hold_generation,
            eligible: false,
        });
        self.hold_generation
    }

    /// Clear the hold (explicit cancel or holder disconnect); idempotent
    pub fn disarm_champion(&mut self, conn_id: Uuid) -> bool {
        match &self.champion {
            Some(hold) if hold.conn_id == conn_id => {
                self.champion = None;
                true
            }
            _ => false,
        }
    }

    /// Expiry-timer callback: mark the hold eligible for normal
    /// admission. Stale generations (replaced or disarmed holds) are
    /// no-ops. Returns the holder to notify, if the hold was live.
    pub fn mark_champion_eligible(&mut self, generation: u64) -> Option<Uuid> {
        match &mut self.champion {
            Some(hold) if hold.generation == generation => {
                hold.eligible = true;
                Some(hold.conn_id)
            }
            _ => None,
        }
    }

    pub fn champion(&self) -> Option<&ChampionHold> {
        self.champion.as_ref()
    }

    pub fn active_match(&self) -> Option<Uuid> {
        self.active_match
    }

    pub fn set_active_match(&mut self, room_id: Uuid) {
        self.active_match = Some(room_id);
    }

    /// Release the single-active slot; idempotent, and a stale room id
    /// (already replaced) does not clobber the current one.
    pub fn clear_active_match(&mut self, room_id: Uuid) {
        if self.active_match == Some(room_id) {
            self.active_match = None;
        }
    }

    /// Admission policy: one match at a time, champion (once eligible)
    /// waits for one challenger, otherwise plain FIFO pairs.
    pub fn can_admit(&self, now: Instant) -> bool {
        if self.active_match.is_some() {
            return false;
        }
        match &self.champion {
            Some(hold) => hold.is_eligible(now) && !self.queue.is_empty(),
            None => self.queue.len() >= 2,
        }
    }

    /// Pop the pairing for a new match. Callers must have checked
    /// `can_admit`; returns None otherwise. The champion (or the first
    /// player out of the queue) takes the left seat.
    pub fn select_pairing(&mut self, now: Instant) -> Option<Pairing> {
        if !self.can_admit(now) {
            return None;
        }
        if let Some(hold) = self.champion.take() {
            let right = self.queue.pop_front()?;
            return Some(Pairing {
                left: QueuedPlayer::new(hold.conn_id, hold.name),
                right,
                consumed_hold: true,
            });
        }
        let left = self.queue.pop_front()?;
        let right = self.queue.pop_front()?;
        Some(Pairing {
            left,
            right,
            consumed_hold: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str) -> QueuedPlayer {
        QueuedPlayer::new(Uuid::new_v4(), name.to_string())
    }

    #[test]
    fn enqueue_is_idempotent_per_handle() {
        let mut lobby = Lobby::new();
        let a = player("A");
        assert!(lobby.enqueue(a.clone()));
        assert!(!lobby.enqueue(a.clone()));
        assert_eq!(lobby.len(), 1);

        // ...even across interleaved joins and leaves
        let b = player("B");
        lobby.enqueue(b.clone());
        lobby.remove(a.conn_id);
        assert!(lobby.enqueue(a.clone()));
        assert!(!lobby.enqueue(b));
        assert_eq!(lobby.len(), 2);
    }

    #[test]
    fn remove_absent_handle_is_noop() {
        let mut lobby = Lobby::new();
        assert!(lobby.remove(Uuid::new_v4()).is_none());
    }

    #[test]
    fn fifo_pairing_assigns_first_joiner_left() {
        let mut lobby = Lobby::new();
        let a = player("A");
        let b = player("B");
        lobby.enqueue(a.clone());
        lobby.enqueue(b.clone());

        let pairing = lobby.select_pairing(Instant::now()).unwrap();
        assert_eq!(pairing.left.conn_id, a.conn_id);
        assert_eq!(pairing.right.conn_id, b.conn_id);
        assert!(!pairing.consumed_hold);
        assert!(lobby.is_empty());
    }

    #[test]
    fn no_admission_while_a_match_is_active() {
        let mut lobby = Lobby::new();
        lobby.enqueue(player("A"));
        lobby.enqueue(player("B"));
        lobby.set_active_match(Uuid::new_v4());
        assert!(!lobby.can_admit(Instant::now()));
        assert!(lobby.select_pairing(Instant::now()).is_none());
    }

    #[test]
    fn clear_active_match_ignores_stale_room() {
        let mut lobby = Lobby::new();
        let live = Uuid::new_v4();
        lobby.set_active_match(live);
        lobby.clear_active_match(Uuid::new_v4());
        assert_eq!(lobby.active_match(), Some(live));
        lobby.clear_active_match(live);
        assert_eq!(lobby.active_match(), None);
        // Second clear is a no-op, not an error
        lobby.clear_active_match(live);
    }

    #[test]
    fn unexpired_hold_blocks_all_admission() {
        let mut lobby = Lobby::new();
        let champ = Uuid::new_v4();
        lobby.arm_champion(champ, "C".into(), Duration::from_secs(60));
        lobby.enqueue(player("A"));
        lobby.enqueue(player("B"));
        assert!(!lobby.can_admit(Instant::now()));
    }

    #[test]
    fn eligible_hold_pairs_champion_left_against_queue_front() {
        let mut lobby = Lobby::new();
        let champ = Uuid::new_v4();
        lobby.arm_champion(champ, "C".into(), Duration::ZERO);
        let a = player("A");
        lobby.enqueue(a.clone());
        lobby.enqueue(player("B"));

        let pairing = lobby.select_pairing(Instant::now()).unwrap();
        assert!(pairing.consumed_hold);
        assert_eq!(pairing.left.conn_id, champ);
        assert_eq!(pairing.right.conn_id, a.conn_id);
        // Consumption clears the hold
        assert!(lobby.champion().is_none());
        assert_eq!(lobby.len(), 1);
    }

    #[test]
    fn hold_with_empty_queue_admits_nothing() {
        let mut lobby = Lobby::new();
        lobby.arm_champion(Uuid::new_v4(), "C".into(), Duration::ZERO);
        assert!(!lobby.can_admit(Instant::now()));
    }

    #[test]
    fn expiry_marks_eligible_without_clearing_the_hold() {
        let mut lobby = Lobby::new();
        let champ = Uuid::new_v4();
        let generation = lobby.arm_champion(champ, "C".into(), Duration::from_secs(60));

        assert_eq!(lobby.mark_champion_eligible(generation), Some(champ));
        assert!(lobby.champion().unwrap().is_eligible(Instant::now()));

        lobby.enqueue(player("A"));
        assert!(lobby.can_admit(Instant::now()));
    }

    #[test]
    fn stale_expiry_generation_is_a_noop() {
        let mut lobby = Lobby::new();
        let first = lobby.arm_champion(Uuid::new_v4(), "C".into(), Duration::from_secs(60));
        let replacement = Uuid::new_v4();
        lobby.arm_champion(replacement, "D".into(), Duration::from_secs(60));

        assert_eq!(lobby.mark_champion_eligible(first), None);
        assert!(!lobby.champion().unwrap().eligible);

        lobby.disarm_champion(replacement);
        assert_eq!(lobby.mark_champion_eligible(first + 1), None);
    }

    #[test]
    fn disarm_is_idempotent_and_scoped_to_the_holder() {
        let mut lobby = Lobby::new();
        let champ = Uuid::new_v4();
        lobby.arm_champion(champ, "C".into(), Duration::ZERO);

        assert!(!lobby.disarm_champion(Uuid::new_v4()));
        assert!(lobby.disarm_champion(champ));
        assert!(!lobby.disarm_champion(champ));
        assert!(lobby.champion().is_none());
    }

    #[test]
    fn arming_removes_the_holder_from_the_queue() {
        let mut lobby = Lobby::new();
        let a = player("A");
        lobby.enqueue(a.clone());
        lobby.arm_champion(a.conn_id, a.name, Duration::ZERO);
        assert!(!lobby.contains(a.conn_id));
    }
}
