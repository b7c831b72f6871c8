//! # Message Router
//!
//! The per-message pipeline every subscription delivery runs through:
//!
//! 1. Skip local echo (our own transport peer).
//! 2. Deserialize; malformed input is charged to the sending peer.
//! 3. Fingerprint dedup against a bounded seen-set; duplicates drop
//!    silently.
//! 4. Validate; invalid envelopes cost the peer reputation.
//! 5. Dispatch to the observer registered for the type.
//!
//! The router owns no sockets: the gossip node feeds it raw bytes and it
//! answers with a verdict. That keeps every step testable without a
//! swarm.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::codec::{CodecError, Envelope};
use crate::config;
use crate::network::dispatch::Dispatcher;
use crate::network::peers::PeerTable;
use crate::util::unix_millis;

// ---------------------------------------------------------------------------
// SeenCache
// ---------------------------------------------------------------------------

/// Bounded FIFO set of envelope fingerprints. Insertion past capacity
/// evicts the oldest entry; with a 300 s message TTL anything that old is
/// unreplayable anyway.
#[derive(Debug)]
pub struct SeenCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Insert a fingerprint. Returns `false` if it was already present.
    pub fn insert(&mut self, fingerprint: String) -> bool {
        if self.seen.contains(&fingerprint) {
            return false;
        }
        self.seen.insert(fingerprint.clone());
        self.order.push_back(fingerprint);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.seen.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// What the router decided about one delivery.
#[derive(Debug)]
pub enum Verdict {
    /// Validated, deduplicated, and dispatched.
    Delivered(Envelope),
    /// Dropped; the reason says whether the peer was charged.
    Dropped(DropReason),
}

#[derive(Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Our own message echoed back.
    LocalEcho,
    /// Failed to parse; peer charged.
    Malformed(String),
    /// Already seen; silent.
    Duplicate,
    /// Parsed but failed validation; peer charged.
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// The shared router. One per node, fed by every subscription and by the
/// direct signal protocol.
pub struct Router {
    /// Our transport peer id, string form, for echo suppression.
    local_peer: String,
    seen: Mutex<SeenCache>,
    peers: Arc<PeerTable>,
    dispatcher: Arc<Dispatcher>,
}

impl Router {
    pub fn new(local_peer: String, peers: Arc<PeerTable>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            local_peer,
            seen: Mutex::new(SeenCache::new(config::SEEN_CACHE_CAPACITY)),
            peers,
            dispatcher,
        }
    }

    /// Process one raw delivery from a subscription.
    pub fn process_incoming(&self, source_peer: &str, bytes: &[u8]) -> Verdict {
        if source_peer == self.local_peer {
            return Verdict::Dropped(DropReason::LocalEcho);
        }

        let envelope = match Envelope::deserialize(bytes) {
            Ok(env) => env,
            Err(e) => {
                debug!(target: "gossip", peer = source_peer, error = %e, "malformed message");
                self.peers.record_invalid(source_peer);
                let reason = match e {
                    CodecError::TooLarge { size, .. } => format!("oversized: {size} bytes"),
                    CodecError::Malformed(m) => m,
                };
                return Verdict::Dropped(DropReason::Malformed(reason));
            }
        };

        self.process_envelope(source_peer, envelope)
    }

    /// Process an already-parsed envelope (the direct signal path joins
    /// here, sharing dedup and validation with gossip deliveries).
    pub fn process_envelope(&self, source_peer: &str, envelope: Envelope) -> Verdict {
        let fingerprint = envelope.fingerprint();
        if !self.seen.lock().insert(fingerprint) {
            trace!(target: "gossip", peer = source_peer, id = %envelope.id, "duplicate dropped");
            return Verdict::Dropped(DropReason::Duplicate);
        }

        if let Err(e) = envelope.validate(unix_millis()) {
            debug!(target: "gossip", peer = source_peer, error = %e, "invalid envelope");
            self.peers.record_invalid(source_peer);
            return Verdict::Dropped(DropReason::Invalid(e.to_string()));
        }

        self.peers.record_valid(source_peer);
        self.dispatcher.dispatch(&envelope, source_peer);
        Verdict::Delivered(envelope)
    }

    /// Mark an outgoing envelope as seen before it hits the wire, so the
    /// node never reprocesses its own publication.
    pub fn mark_published(&self, envelope: &Envelope) {
        self.seen.lock().insert(envelope.fingerprint());
    }

    /// Fingerprints currently remembered.
    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::payload::Ping;
    use crate::codec::MessageType;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn setup() -> (Router, Arc<PeerTable>, Arc<Dispatcher>) {
        let peers = Arc::new(PeerTable::new());
        let dispatcher = Arc::new(Dispatcher::new());
        let router = Router::new(
            "local-peer".to_string(),
            Arc::clone(&peers),
            Arc::clone(&dispatcher),
        );
        (router, peers, dispatcher)
    }

    fn ping(nonce: &str) -> Envelope {
        Envelope::new(
            MessageType::Ping,
            "n1",
            &Ping {
                timestamp: 1,
                nonce: nonce.to_string(),
            },
        )
    }

    #[test]
    fn valid_message_is_delivered_and_credited() {
        let (router, peers, dispatcher) = setup();
        let hits = Arc::new(AtomicU32::new(0));
        let hits_ref = Arc::clone(&hits);
        dispatcher
            .register(MessageType::Ping, move |_, _| {
                hits_ref.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let bytes = ping("a").serialize().unwrap();
        let verdict = router.process_incoming("peer-1", &bytes);

        assert!(matches!(verdict, Verdict::Delivered(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(peers.get("peer-1").unwrap().valid_msg_count, 1);
    }

    #[test]
    fn local_echo_is_skipped_without_accounting() {
        let (router, peers, _) = setup();
        let bytes = ping("a").serialize().unwrap();

        let verdict = router.process_incoming("local-peer", &bytes);
        assert!(matches!(verdict, Verdict::Dropped(DropReason::LocalEcho)));
        assert!(peers.get("local-peer").is_none());
    }

    #[test]
    fn malformed_bytes_cost_reputation() {
        let (router, peers, _) = setup();
        let verdict = router.process_incoming("peer-1", b"not an envelope");

        assert!(matches!(
            verdict,
            Verdict::Dropped(DropReason::Malformed(_))
        ));
        let record = peers.get("peer-1").unwrap();
        assert_eq!(record.invalid_msg_count, 1);
        assert_eq!(
            record.reputation,
            config::REPUTATION_INITIAL - config::REPUTATION_INVALID_PENALTY
        );
    }

    #[test]
    fn duplicates_drop_silently() {
        let (router, peers, _) = setup();
        let bytes = ping("a").serialize().unwrap();

        assert!(matches!(
            router.process_incoming("peer-1", &bytes),
            Verdict::Delivered(_)
        ));
        // Same envelope again, even from a different peer.
        assert!(matches!(
            router.process_incoming("peer-2", &bytes),
            Verdict::Dropped(DropReason::Duplicate)
        ));

        // No reputational charge for duplicates.
        assert!(peers.get("peer-2").is_none());
    }

    #[test]
    fn retransmission_with_fresh_id_still_dedups() {
        let (router, _, _) = setup();
        let first = ping("same-nonce");
        let mut second = ping("same-nonce");
        second.id = "another-id".to_string();

        assert!(matches!(
            router.process_incoming("peer-1", &first.serialize().unwrap()),
            Verdict::Delivered(_)
        ));
        assert!(matches!(
            router.process_incoming("peer-1", &second.serialize().unwrap()),
            Verdict::Dropped(DropReason::Duplicate)
        ));
    }

    #[test]
    fn invalid_envelope_costs_reputation() {
        let (router, peers, _) = setup();
        let mut env = ping("a");
        env.hops = (config::MAX_HOPS + 5) as i64;
        let bytes = env.serialize().unwrap();

        let verdict = router.process_incoming("peer-1", &bytes);
        assert!(matches!(verdict, Verdict::Dropped(DropReason::Invalid(_))));
        assert_eq!(peers.get("peer-1").unwrap().invalid_msg_count, 1);
    }

    #[test]
    fn mark_published_suppresses_own_message() {
        let (router, _, _) = setup();
        let env = ping("published");
        router.mark_published(&env);

        let verdict = router.process_incoming("peer-1", &env.serialize().unwrap());
        assert!(matches!(
            verdict,
            Verdict::Dropped(DropReason::Duplicate)
        ));
    }

    #[test]
    fn seen_cache_evicts_oldest_first() {
        let mut cache = SeenCache::new(3);
        for fp in ["a", "b", "c"] {
            assert!(cache.insert(fp.to_string()));
        }
        assert!(cache.insert("d".to_string())); // evicts "a"

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("a"));
        assert!(cache.contains("d"));
        // "a" would be accepted again after eviction.
        assert!(cache.insert("a".to_string()));
    }

    #[test]
    fn signal_path_shares_dedup_with_gossip() {
        let (router, _, _) = setup();
        let env = ping("direct");

        assert!(matches!(
            router.process_envelope("peer-1", env.clone()),
            Verdict::Delivered(_)
        ));
        // The same content arriving over gossip is a duplicate.
        assert!(matches!(
            router.process_incoming("peer-2", &env.serialize().unwrap()),
            Verdict::Dropped(DropReason::Duplicate)
        ));
    }
}
