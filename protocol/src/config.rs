//! # Protocol Configuration & Constants
//!
//! Every magic number in P402 lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! These values are shared by every node on the network. A node with a
//! different `MAX_HOPS` or a different topic string is, for all practical
//! purposes, on a different network.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Wire protocol version carried in every envelope. Bump the minor on
/// backward-compatible payload additions, the major on anything that
/// changes envelope validation.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Gossip Topics
// ---------------------------------------------------------------------------

/// Token lifecycle: announcements, requests, token data, plus the
/// HELLO/PING/PONG liveness chatter that rides along.
pub const TOPIC_TOKENS: &str = "$402/tokens/v1";

/// Transfer events and holder-count updates.
pub const TOPIC_TRANSFERS: &str = "$402/transfers/v1";

/// Ticket stamps (proof a ticket was used).
pub const TOPIC_STAMPS: &str = "$402/stamps/v1";

/// Public chat rooms.
pub const TOPIC_CHAT: &str = "$402/chat/v1";

/// Content requests and offers.
pub const TOPIC_CONTENT: &str = "$402/content/v1";

/// PoI block announcements.
pub const TOPIC_BLOCKS: &str = "$402/blocks/v1";

/// Raw transaction relay (request/response over gossip).
pub const TOPIC_RELAY: &str = "$402/relay/v1";

/// Every topic the router joins at startup, in join order.
pub const ALL_TOPICS: [&str; 7] = [
    TOPIC_TOKENS,
    TOPIC_TRANSFERS,
    TOPIC_STAMPS,
    TOPIC_CHAT,
    TOPIC_CONTENT,
    TOPIC_BLOCKS,
    TOPIC_RELAY,
];

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Namespace under which peers register on the DHT. Nodes that provide
/// this key can find each other with zero prior knowledge.
pub const RENDEZVOUS: &str = "$402-gossip-v1";

/// LAN service tag. libp2p's mDNS speaks its own standard service name on
/// the wire; this tag rides in the identify agent-version string so P402
/// peers can be told apart in mixed LANs.
pub const MDNS_SERVICE: &str = "$402-gossip";

/// Protocol id for the identify exchange.
pub const IDENTIFY_PROTOCOL: &str = "/p402/id/1.0.0";

/// Protocol id for direct (non-gossip) signal streams between two peers.
pub const SIGNAL_PROTOCOL: &str = "/p402/signal/1.0.0";

/// How often the bootstrap loop checks whether we have fallen off the
/// network (peer count zero) and should re-dial the bootstrap list.
pub const BOOTSTRAP_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Per-dial timeout when reconnecting to a bootstrap entry.
pub const BOOTSTRAP_DIAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Warm-up before the first DHT advertisement. The routing table needs a
/// few connections before provider records will actually replicate.
pub const DHT_WARMUP: Duration = Duration::from_secs(5);

/// Interval between DHT re-advertisement and discovery passes. Provider
/// records expire; this keeps ours fresh and sweeps for new peers.
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(15);

/// Timeout for a single DHT query (provider lookup / closest-peers crawl).
pub const DHT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-dial timeout for connection attempts made from discovery results.
pub const DISCOVERY_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Gossip Limits
// ---------------------------------------------------------------------------

/// Default TCP port for the gossip transport.
pub const GOSSIP_PORT: u16 = 4020;

/// Hard cap on serialized envelope size. Anything larger is rejected
/// before parsing.
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// Envelope validity window in seconds, measured from the sender's
/// timestamp.
pub const MESSAGE_TTL: u64 = 300;

/// Maximum relay hops before an envelope is dropped.
pub const MAX_HOPS: u32 = 10;

/// Maximum concurrent transport connections.
pub const MAX_CONNECTIONS: u32 = 50;

/// Fingerprints remembered for deduplication. Oldest evicted first; with a
/// 300 s TTL, anything older than this window is unreplayable anyway.
pub const SEEN_CACHE_CAPACITY: usize = 65_536;

// ---------------------------------------------------------------------------
// Peer Reputation
// ---------------------------------------------------------------------------

/// Reputation assigned to a peer on first contact.
pub const REPUTATION_INITIAL: u32 = 50;

/// Reputation ceiling.
pub const REPUTATION_MAX: u32 = 100;

/// Reputation credit per valid message.
pub const REPUTATION_VALID_DELTA: u32 = 1;

/// Reputation penalty per invalid message.
pub const REPUTATION_INVALID_PENALTY: u32 = 10;

// ---------------------------------------------------------------------------
// Mining
// ---------------------------------------------------------------------------

/// Block version written into every locally mined header.
pub const BLOCK_VERSION: u32 = 1;

/// Work items pulled into one block template.
pub const MINER_BATCH_SIZE: usize = 10;

/// Minimum mempool depth before the miner leaves Idle.
pub const MINER_MIN_ITEMS: usize = 5;

/// Nonce budget for a single mining attempt. On exhaustion the template is
/// rebuilt with a fresh timestamp and current mempool contents.
pub const NONCE_BUDGET: u64 = 1_000_000;

/// Nonces tried between cooperative yields.
pub const NONCE_CHUNK: u64 = 1_000;

/// Sleep between nonce chunks, keeping the miner from starving the
/// event loop.
pub const CHUNK_YIELD: Duration = Duration::from_millis(1);

/// Header timestamp refresh cadence, in nonces. Refreshing mid-attempt is
/// what lets a retarget take effect within one attempt.
pub const TIMESTAMP_REFRESH_NONCES: u64 = 10_000;

/// Interval between heartbeat work-item injections when the mempool is
/// under `MINER_MIN_ITEMS`. Keeps the chain alive on a quiet network.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Poll interval for the miner's idle loop.
pub const MINER_IDLE_POLL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Difficulty
// ---------------------------------------------------------------------------

/// Target spacing between blocks, network-wide.
pub const TARGET_BLOCK_TIME: Duration = Duration::from_secs(600);

/// Blocks per retarget window.
pub const ADJUSTMENT_PERIOD: usize = 10;

/// Fixed-point scale for the retarget ratio. 10_000 micro-units = 1.0.
/// The final target is integer math end to end; no floats touch it.
pub const RATIO_SCALE: u64 = 10_000;

/// Lower clamp on the retarget ratio (1/4).
pub const RATIO_MIN: u64 = RATIO_SCALE / 4;

/// Upper clamp on the retarget ratio (4x).
pub const RATIO_MAX: u64 = RATIO_SCALE * 4;

// ---------------------------------------------------------------------------
// Settlement Claims
// ---------------------------------------------------------------------------

/// First pushdata item of every on-chain commitment.
pub const CLAIM_PROTOCOL_TAG: &str = "$402";

/// Second pushdata item: the action discriminator.
pub const CLAIM_ACTION: &str = "poi";

/// Fee rate: satoshis per 1000 bytes of raw transaction.
pub const CLAIM_FEE_PER_KB: u64 = 1;

/// Bounds for the uniform random retry backoff.
pub const CLAIM_MIN_BACKOFF: Duration = Duration::from_secs(2);
pub const CLAIM_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Additional attempts after the first (4 attempts total by default).
pub const CLAIM_MAX_RETRIES: u32 = 3;

/// Timeout for claim HTTP calls (UTXO fetch, broadcast).
pub const CLAIM_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
