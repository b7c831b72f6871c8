//! # Block Store
//!
//! Persistence for PoI blocks, built on sled's embedded key-value store.
//!
//! ## Tree layout
//!
//! | Tree     | Key                     | Value            |
//! |----------|-------------------------|------------------|
//! | `blocks` | block hash (UTF-8 hex)  | `bincode(Block)` |
//! | `seq`    | insertion index (8B BE) | block hash       |
//! | `meta`   | key (UTF-8)             | value (bytes)    |
//!
//! The `seq` tree records insertion order with big-endian u64 keys so
//! sled's lexicographic iteration matches numeric order, so `latest()` and
//! `recent()` are range scans, no sorting.
//!
//! Blocks arrive in any order (a future block can be announced before its
//! predecessor reaches us), so the chain tip is tracked as the maximum
//! height seen, first block at a height winning ties.

use sled::{Db, Tree};
use std::path::Path;

use super::block::Block;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during block store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("duplicate block hash: {0}")]
    DuplicateHash(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Metadata keys
// ---------------------------------------------------------------------------

const META_NEXT_SEQ: &[u8] = b"next_seq";
const META_COUNT: &[u8] = b"block_count";
const META_OWN_COUNT: &[u8] = b"own_block_count";
const META_TIP_HASH: &[u8] = b"tip_hash";
const META_TIP_HEIGHT: &[u8] = b"tip_height";
const META_TARGET_HEX: &[u8] = b"difficulty_target_hex";

// ---------------------------------------------------------------------------
// ChainTip
// ---------------------------------------------------------------------------

/// The block of maximum height known to this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub hash: String,
    pub height: u64,
}

// ---------------------------------------------------------------------------
// BlockStore
// ---------------------------------------------------------------------------

/// Persistent store for PoI blocks and chain metadata.
///
/// sled trees support lock-free concurrent reads and serialized writes, so
/// the store is shared across tasks as a plain `Arc<BlockStore>` with no
/// external locking.
#[derive(Debug, Clone)]
pub struct BlockStore {
    db: Db,
    blocks: Tree,
    seq: Tree,
    meta: Tree,
}

impl BlockStore {
    /// Open or create a store at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open an in-memory-ish temporary store, wiped when dropped. For
    /// tests and `--dev` runs.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let blocks = db.open_tree("blocks")?;
        let seq = db.open_tree("seq")?;
        let meta = db.open_tree("meta")?;
        Ok(Self {
            db,
            blocks,
            seq,
            meta,
        })
    }

    /// Insert a block, idempotent on hash. `is_own` marks whether this
    /// node mined it, overriding whatever the announced copy claims.
    ///
    /// Returns `DuplicateHash` if the hash is already present; the stored
    /// block is left untouched in that case.
    pub fn insert(&self, block: &Block, is_own: bool) -> StoreResult<()> {
        if self.blocks.contains_key(block.hash.as_bytes())? {
            return Err(StoreError::DuplicateHash(block.hash.clone()));
        }

        let mut stored = block.clone();
        stored.is_own = is_own;

        let encoded = bincode::serialize(&stored)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let seq_no = self.bump_counter(META_NEXT_SEQ)?;
        self.blocks.insert(stored.hash.as_bytes(), encoded)?;
        self.seq
            .insert(seq_no.to_be_bytes(), stored.hash.as_bytes())?;

        self.bump_counter(META_COUNT)?;
        if is_own {
            self.bump_counter(META_OWN_COUNT)?;
        }

        // Tip advances only on strictly greater height: the first block
        // to reach a height keeps the tip on an equal-height fork.
        let current_tip = self.read_u64(META_TIP_HEIGHT)?;
        let advance = match current_tip {
            Some(h) => stored.height > h,
            None => true,
        };
        if advance {
            self.meta
                .insert(META_TIP_HEIGHT, stored.height.to_be_bytes().to_vec())?;
            self.meta.insert(META_TIP_HASH, stored.hash.as_bytes())?;
        }

        self.db.flush()?;
        Ok(())
    }

    /// Attach the settlement txid to an already-persisted block.
    pub fn set_mint_txid(&self, hash: &str, txid: &str) -> StoreResult<()> {
        let Some(mut block) = self.get_by_hash(hash)? else {
            return Ok(()); // annotating a pruned block is a no-op
        };
        block.mint_txid = Some(txid.to_string());
        let encoded = bincode::serialize(&block)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.blocks.insert(hash.as_bytes(), encoded)?;
        self.db.flush()?;
        Ok(())
    }

    /// Look up a block by hash.
    pub fn get_by_hash(&self, hash: &str) -> StoreResult<Option<Block>> {
        match self.blocks.get(hash.as_bytes())? {
            Some(bytes) => {
                let block = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    /// The most recently inserted block.
    pub fn latest(&self) -> StoreResult<Option<Block>> {
        match self.seq.last()? {
            Some((_, hash)) => {
                let hash = String::from_utf8_lossy(&hash).to_string();
                self.get_by_hash(&hash)
            }
            None => Ok(None),
        }
    }

    /// Up to `limit` blocks, newest insertion first, skipping `offset`.
    pub fn recent(&self, limit: usize, offset: usize) -> StoreResult<Vec<Block>> {
        let mut out = Vec::with_capacity(limit);
        for entry in self.seq.iter().rev().skip(offset).take(limit) {
            let (_, hash) = entry?;
            let hash = String::from_utf8_lossy(&hash).to_string();
            if let Some(block) = self.get_by_hash(&hash)? {
                out.push(block);
            }
        }
        Ok(out)
    }

    /// Total persisted blocks.
    pub fn count(&self) -> StoreResult<u64> {
        Ok(self.read_u64(META_COUNT)?.unwrap_or(0))
    }

    /// Blocks this node mined itself.
    pub fn own_count(&self) -> StoreResult<u64> {
        Ok(self.read_u64(META_OWN_COUNT)?.unwrap_or(0))
    }

    /// Header timestamps of all blocks with `timestamp >= since_ms`, in
    /// insertion order. Feeds the difficulty adjuster's restore path.
    pub fn timestamps_since(&self, since_ms: u64) -> StoreResult<Vec<u64>> {
        let mut out = Vec::new();
        for entry in self.seq.iter() {
            let (_, hash) = entry?;
            let hash = String::from_utf8_lossy(&hash).to_string();
            if let Some(block) = self.get_by_hash(&hash)? {
                if block.header.timestamp >= since_ms {
                    out.push(block.header.timestamp);
                }
            }
        }
        Ok(out)
    }

    /// Header timestamps of the last `n` inserted blocks, oldest first.
    pub fn recent_timestamps(&self, n: usize) -> StoreResult<Vec<u64>> {
        let mut out: Vec<u64> = self
            .recent(n, 0)?
            .iter()
            .map(|b| b.header.timestamp)
            .collect();
        out.reverse();
        Ok(out)
    }

    /// The chain tip: block of maximum height, or `None` on a fresh store.
    pub fn tip(&self) -> StoreResult<Option<ChainTip>> {
        let height = self.read_u64(META_TIP_HEIGHT)?;
        let hash = self.meta.get(META_TIP_HASH)?;
        match (height, hash) {
            (Some(height), Some(hash)) => Ok(Some(ChainTip {
                hash: String::from_utf8_lossy(&hash).to_string(),
                height,
            })),
            _ => Ok(None),
        }
    }

    /// Persist the current difficulty target so a restart resumes at the
    /// network's difficulty instead of the maximum target.
    pub fn set_target_hex(&self, target_hex: &str) -> StoreResult<()> {
        self.meta.insert(META_TARGET_HEX, target_hex.as_bytes())?;
        Ok(())
    }

    /// The persisted difficulty target, if any.
    pub fn target_hex(&self) -> StoreResult<Option<String>> {
        Ok(self
            .meta
            .get(META_TARGET_HEX)?
            .map(|v| String::from_utf8_lossy(&v).to_string()))
    }

    // -- internals ----------------------------------------------------------

    fn read_u64(&self, key: &[u8]) -> StoreResult<Option<u64>> {
        match self.meta.get(key)? {
            Some(v) if v.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&v);
                Ok(Some(u64::from_be_bytes(buf)))
            }
            _ => Ok(None),
        }
    }

    /// Post-increment a meta counter, returning the value before the bump.
    fn bump_counter(&self, key: &[u8]) -> StoreResult<u64> {
        let current = self.read_u64(key)?.unwrap_or(0);
        self.meta.insert(key, (current + 1).to_be_bytes().to_vec())?;
        Ok(current)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
