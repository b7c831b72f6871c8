//! # Proof-of-Indexing Miner
//!
//! One miner task per node. The loop idles until the mempool holds enough
//! work, pulls a batch into a block template, and searches nonces against
//! the network target in cooperative chunks: a 1 ms yield between chunks
//! keeps the event loop breathing, and the header timestamp is refreshed
//! every 10⁴ nonces so a retarget mid-attempt takes effect without
//! abandoning the attempt.
//!
//! A solved block is persisted, its work items leave the mempool, its
//! timestamp feeds the difficulty adjuster (own blocks count toward the
//! global rate), and the block is handed to the node runtime over a
//! channel for network announcement and settlement claiming.
//!
//! On budget exhaustion nothing is emitted; the next iteration rebuilds
//! the template with a fresh timestamp and whatever the mempool holds by
//! then. `take` never removes, so an abandoned attempt loses no work.

use parking_lot::Mutex;
use primitive_types::U256;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config;
use crate::mining::difficulty::{check_leading, DifficultyAdjuster};
use crate::mining::mempool::Mempool;
use crate::mining::work::{WorkItem, WorkKind};
use crate::storage::block::{merkle_root_for_items, Block, BlockHeader, GENESIS_PREV_HASH};
use crate::storage::BlockStore;
use crate::util::unix_millis;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable miner parameters. Defaults come from the protocol constants;
/// tests shrink the budget and difficulty.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Work items per block template.
    pub batch_size: usize,
    /// Mempool depth required to leave Idle.
    pub min_items: usize,
    /// Header version for locally mined blocks.
    pub version: u32,
    /// Settlement-chain address credited in the header.
    pub miner_address: String,
    /// Nonces tried per attempt before the template is rebuilt.
    pub nonce_budget: u64,
    /// Nonces per cooperative chunk.
    pub nonce_chunk: u64,
    /// Leading-zero requirement when no difficulty adjuster is attached.
    pub fallback_bits: u32,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            batch_size: config::MINER_BATCH_SIZE,
            min_items: config::MINER_MIN_ITEMS,
            version: config::BLOCK_VERSION,
            miner_address: String::new(),
            nonce_budget: config::NONCE_BUDGET,
            nonce_chunk: config::NONCE_CHUNK,
            fallback_bits: 4,
        }
    }
}

/// Where the miner loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    /// Waiting for the mempool to fill.
    Idle,
    /// Searching nonces on a batch.
    Mining,
    /// Disabled by the user switch; the loop stays up.
    Paused,
}

// ---------------------------------------------------------------------------
// Miner
// ---------------------------------------------------------------------------

/// The mining service. Owns no network I/O; solved blocks leave through
/// the channel handed to [`Miner::new`], and the node runtime does the
/// announcing and claiming.
pub struct Miner {
    config: MinerConfig,
    mempool: Arc<Mempool>,
    store: Arc<BlockStore>,
    adjuster: Option<Arc<DifficultyAdjuster>>,
    paused: Mutex<bool>,
    state: Mutex<MinerState>,
    found_tx: mpsc::Sender<Block>,
}

impl Miner {
    pub fn new(
        config: MinerConfig,
        mempool: Arc<Mempool>,
        store: Arc<BlockStore>,
        adjuster: Option<Arc<DifficultyAdjuster>>,
        found_tx: mpsc::Sender<Block>,
    ) -> Self {
        Self {
            config,
            mempool,
            store,
            adjuster,
            paused: Mutex::new(false),
            state: Mutex::new(MinerState::Idle),
            found_tx,
        }
    }

    /// Flip the user pause switch. Takes effect at the next chunk
    /// boundary; the loop itself stays alive.
    pub fn set_paused(&self, paused: bool) {
        *self.paused.lock() = paused;
        info!(target: "mining", paused, "miner pause switch");
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    pub fn state(&self) -> MinerState {
        *self.state.lock()
    }

    /// Run until the shutdown signal trips. Each iteration either idles,
    /// honors the pause switch, or makes one bounded mining attempt.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(target: "mining", miner = %self.config.miner_address, "miner loop starting");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.is_paused() {
                *self.state.lock() = MinerState::Paused;
                if idle_wait(&mut shutdown).await {
                    break;
                }
                continue;
            }

            if self.mempool.len() < self.config.min_items {
                *self.state.lock() = MinerState::Idle;
                if idle_wait(&mut shutdown).await {
                    break;
                }
                continue;
            }

            *self.state.lock() = MinerState::Mining;
            match self.mine_once(&shutdown).await {
                Some(block) => {
                    info!(
                        target: "mining",
                        hash = %block.hash,
                        height = block.height,
                        items = block.item_count(),
                        nonce = block.header.nonce,
                        "block found"
                    );
                }
                None => {
                    debug!(target: "mining", "attempt exhausted, rebuilding template");
                }
            }
        }

        info!(target: "mining", "miner loop stopped");
    }

    /// One bounded mining attempt over the current mempool head. Returns
    /// the solved block after full handoff, or `None` on exhaustion,
    /// pause, or shutdown (the batch is abandoned with no partial state).
    pub async fn mine_once(&self, shutdown: &watch::Receiver<bool>) -> Option<Block> {
        let batch = self.mempool.take(self.config.batch_size);
        let ids: Vec<String> = batch.iter().map(|i| i.id.clone()).collect();

        // Target snapshot for the whole attempt. The timestamp refresh is
        // what lets a retarget shorten the attempt; the threshold itself
        // stays fixed per batch.
        let target: Option<U256> = self.adjuster.as_ref().map(|a| a.target());
        let bits = match &self.adjuster {
            Some(a) => a.difficulty(),
            None => self.config.fallback_bits,
        };

        let (prev_hash, height) = match self.store.tip() {
            Ok(Some(tip)) => (tip.hash, tip.height + 1),
            Ok(None) => (GENESIS_PREV_HASH.to_string(), 1),
            Err(e) => {
                warn!(target: "mining", error = %e, "tip read failed, skipping attempt");
                return None;
            }
        };

        let mut header = BlockHeader {
            version: self.config.version,
            prev_hash,
            merkle_root: merkle_root_for_items(&batch),
            timestamp: unix_millis(),
            bits,
            nonce: 0,
            miner_address: self.config.miner_address.clone(),
        };

        let mut tried: u64 = 0;
        while tried < self.config.nonce_budget {
            if *shutdown.borrow() || self.is_paused() {
                return None;
            }

            let chunk_end = (tried + self.config.nonce_chunk).min(self.config.nonce_budget);
            while tried < chunk_end {
                if tried > 0 && tried % config::TIMESTAMP_REFRESH_NONCES == 0 {
                    header.timestamp = unix_millis();
                }
                header.nonce = tried;
                let hash = header.hash();
                if hash_meets(&hash, target, bits) {
                    return self.hand_off(header, batch, ids, height, target).await;
                }
                tried += 1;
            }

            tokio::time::sleep(config::CHUNK_YIELD).await;
        }

        None
    }

    /// Persist, drain, retarget, announce, in that order.
    async fn hand_off(
        &self,
        header: BlockHeader,
        batch: Vec<WorkItem>,
        ids: Vec<String>,
        height: u64,
        target: Option<U256>,
    ) -> Option<Block> {
        let target_hex = match target {
            Some(t) => format!("{:064x}", t),
            None => leading_zero_target_hex(header.bits),
        };
        let timestamp = header.timestamp;
        let block = Block::assemble(header, batch, height, true, target_hex);

        if let Err(e) = self.store.insert(&block, true) {
            // A duplicate here means we mined a hash we already know;
            // vanishingly unlikely, but not worth crashing over.
            warn!(target: "mining", error = %e, "failed to persist own block");
            return None;
        }

        self.mempool.remove(&ids);

        if let Some(adjuster) = &self.adjuster {
            adjuster.record_block(timestamp);
            if let Err(e) = self.store.set_target_hex(&adjuster.target_hex()) {
                warn!(target: "mining", error = %e, "failed to persist target");
            }
        }

        if self.found_tx.send(block.clone()).await.is_err() {
            debug!(target: "mining", "no block consumer attached");
        }

        Some(block)
    }
}

/// Acceptance test for one candidate hash.
fn hash_meets(hash_hex: &str, target: Option<U256>, bits: u32) -> bool {
    match target {
        Some(t) => match U256::from_str_radix(hash_hex, 16) {
            Ok(value) => value <= t,
            Err(_) => false,
        },
        None => check_leading(hash_hex, bits),
    }
}

/// The 64-hex threshold equivalent to "bits leading zero hex chars".
fn leading_zero_target_hex(bits: u32) -> String {
    let zeros = (bits as usize).min(64);
    format!("{}{}", "0".repeat(zeros), "f".repeat(64 - zeros))
}

/// Sleep one idle poll, waking early on shutdown. Returns `true` when the
/// loop should exit. A closed channel counts as shutdown.
async fn idle_wait(shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(config::MINER_IDLE_POLL) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Inject a heartbeat work item whenever the mempool is under
/// `min_items`, keeping the chain alive on a quiet network. Runs until
/// shutdown.
pub async fn heartbeat_loop(
    mempool: Arc<Mempool>,
    min_items: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config::HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if mempool.len() < min_items {
                    let item = WorkItem::new(
                        WorkKind::Heartbeat,
                        serde_json::json!({ "at": unix_millis() }),
                    );
                    debug!(target: "mining", id = %item.id, "heartbeat work injected");
                    mempool.add(item);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
