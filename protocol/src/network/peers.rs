//! # Peer Table
//!
//! Reputation accounting for every peer the overlay has exchanged
//! messages with. Misbehavior is scored, not punished with disconnection:
//! a peer loses 10 reputation per invalid message and earns 1 back per
//! valid one, and only at zero (with invalid messages on record) is it
//! banned. Records outlive the connection so a flapping peer cannot
//! launder its score.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::util::unix_millis;

/// Where a peer stands with this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Currently connected (or recently heard from).
    Active,
    /// Disconnected; record retained.
    Stale,
    /// Reputation exhausted by invalid messages.
    Banned,
}

/// One peer's standing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Transport peer id, string form.
    pub peer_id: String,
    /// Last known remote host.
    pub host: String,
    /// Last known remote port.
    pub port: u16,
    pub status: PeerStatus,
    /// 0..=100; starts neutral.
    pub reputation: u32,
    pub valid_msg_count: u64,
    pub invalid_msg_count: u64,
    /// Milliseconds since epoch of the last message or connection event.
    pub last_seen: u64,
}

impl PeerRecord {
    fn new(peer_id: &str, host: &str, port: u16) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            host: host.to_string(),
            port,
            status: PeerStatus::Active,
            reputation: config::REPUTATION_INITIAL,
            valid_msg_count: 0,
            invalid_msg_count: 0,
            last_seen: unix_millis(),
        }
    }

    /// Banned iff reputation bottomed out under actual misbehavior; a
    /// peer that merely never spoke is not bannable.
    fn refresh_status(&mut self, connected: bool) {
        self.status = if self.reputation == 0 && self.invalid_msg_count > 0 {
            PeerStatus::Banned
        } else if connected {
            PeerStatus::Active
        } else {
            PeerStatus::Stale
        };
    }
}

/// Concurrent peer table. Share as `Arc<PeerTable>`.
#[derive(Debug, Default)]
pub struct PeerTable {
    records: DashMap<String, PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a peer on connection establishment.
    pub fn observe_connected(&self, peer_id: &str, host: &str, port: u16) {
        let mut entry = self
            .records
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerRecord::new(peer_id, host, port));
        entry.host = host.to_string();
        entry.port = port;
        entry.last_seen = unix_millis();
        entry.refresh_status(true);
    }

    /// Mark a peer disconnected. The record survives.
    pub fn observe_disconnected(&self, peer_id: &str) {
        if let Some(mut record) = self.records.get_mut(peer_id) {
            record.refresh_status(false);
        }
    }

    /// Credit one valid message: +1 reputation, capped.
    pub fn record_valid(&self, peer_id: &str) {
        let mut record = self
            .records
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerRecord::new(peer_id, "", 0));
        record.reputation = (record.reputation + config::REPUTATION_VALID_DELTA)
            .min(config::REPUTATION_MAX);
        record.valid_msg_count += 1;
        record.last_seen = unix_millis();
        record.refresh_status(true);
    }

    /// Charge one invalid message: -10 reputation, floored at zero.
    pub fn record_invalid(&self, peer_id: &str) {
        let mut record = self
            .records
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerRecord::new(peer_id, "", 0));
        record.reputation = record
            .reputation
            .saturating_sub(config::REPUTATION_INVALID_PENALTY);
        record.invalid_msg_count += 1;
        record.last_seen = unix_millis();
        record.refresh_status(true);
    }

    pub fn is_banned(&self, peer_id: &str) -> bool {
        self.records
            .get(peer_id)
            .map(|r| r.status == PeerStatus::Banned)
            .unwrap_or(false)
    }

    pub fn get(&self, peer_id: &str) -> Option<PeerRecord> {
        self.records.get(peer_id).map(|r| r.clone())
    }

    /// Number of peers currently marked active.
    pub fn active_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == PeerStatus::Active)
            .count()
    }

    /// Total records, any status.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Point-in-time copy for the health endpoint and logs.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.records.iter().map(|r| r.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_peer_starts_neutral_and_active() {
        let table = PeerTable::new();
        table.observe_connected("p1", "10.0.0.5", 4020);

        let record = table.get("p1").unwrap();
        assert_eq!(record.reputation, config::REPUTATION_INITIAL);
        assert_eq!(record.status, PeerStatus::Active);
        assert_eq!(record.host, "10.0.0.5");
    }

    #[test]
    fn valid_messages_cap_at_max() {
        let table = PeerTable::new();
        table.observe_connected("p1", "h", 1);
        for _ in 0..200 {
            table.record_valid("p1");
        }
        let record = table.get("p1").unwrap();
        assert_eq!(record.reputation, config::REPUTATION_MAX);
        assert_eq!(record.valid_msg_count, 200);
    }

    #[test]
    fn invalid_messages_floor_at_zero_and_ban() {
        let table = PeerTable::new();
        table.observe_connected("p1", "h", 1);

        // 50 initial / 10 per hit = 5 hits to the floor.
        for i in 0..5 {
            table.record_invalid("p1");
            if i < 4 {
                assert!(!table.is_banned("p1"), "not banned until zero");
            }
        }
        assert!(table.is_banned("p1"));
        let record = table.get("p1").unwrap();
        assert_eq!(record.reputation, 0);
        assert_eq!(record.invalid_msg_count, 5);
    }

    #[test]
    fn zero_reputation_without_invalids_is_not_banned() {
        // The ban rule is conditional on the invalid count, not on the
        // score alone.
        let mut record = PeerRecord::new("p1", "h", 1);
        record.reputation = 0;
        record.refresh_status(true);
        assert_eq!(record.status, PeerStatus::Active);
    }

    #[test]
    fn good_behavior_lifts_a_ban() {
        let table = PeerTable::new();
        table.observe_connected("p1", "h", 1);
        for _ in 0..5 {
            table.record_invalid("p1");
        }
        assert!(table.is_banned("p1"));

        table.record_valid("p1");
        assert!(!table.is_banned("p1"));
        assert_eq!(table.get("p1").unwrap().reputation, 1);
    }

    #[test]
    fn disconnect_marks_stale_and_keeps_score() {
        let table = PeerTable::new();
        table.observe_connected("p1", "h", 1);
        table.record_invalid("p1");
        table.observe_disconnected("p1");

        let record = table.get("p1").unwrap();
        assert_eq!(record.status, PeerStatus::Stale);
        assert_eq!(record.reputation, config::REPUTATION_INITIAL - 10);

        // Reconnecting does not reset the score.
        table.observe_connected("p1", "h", 1);
        assert_eq!(
            table.get("p1").unwrap().reputation,
            config::REPUTATION_INITIAL - 10
        );
    }

    #[test]
    fn messages_from_unknown_peers_create_records() {
        let table = PeerTable::new();
        table.record_valid("ghost");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("ghost").unwrap().valid_msg_count, 1);
    }

    #[test]
    fn active_count_tracks_status() {
        let table = PeerTable::new();
        table.observe_connected("a", "h", 1);
        table.observe_connected("b", "h", 2);
        assert_eq!(table.active_count(), 2);

        table.observe_disconnected("a");
        assert_eq!(table.active_count(), 1);
        assert_eq!(table.len(), 2);
    }
}
