//! # PoI Block Structure
//!
//! A Proof-of-Indexing block packages a batch of observed work items under
//! a mined header. Unlike a value-bearing chain, the block carries no
//! balances; its Merkle root is a commitment to "this work happened",
//! later anchored on the settlement chain by the claim pipeline.
//!
//! ## Header serialization
//!
//! The hash preimage is the seven header fields joined by ASCII `:` in
//! declaration order, with no escaping:
//!
//! ```text
//! version:prev_hash:merkle_root:timestamp:bits:nonce:miner_address
//! ```
//!
//! The block hash is `SHA256(SHA256(preimage))`, lowercase hex. Peers
//! recompute it from the announced header, so this string format is
//! consensus-critical.
//!
//! ## Merkle root
//!
//! `SHA256(sorted(ids).join("|"))`, ids sorted ascending so the root is
//! independent of submission order. An empty batch commits to
//! `SHA256("empty")`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hash::{double_sha256_hex, sha256_hex};
use crate::mining::work::WorkItem;

/// Prev-hash of the first block a node ever mines.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Errors from header parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderParseError {
    #[error("expected 7 colon-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid numeric field {field}: {value}")]
    BadNumber { field: &'static str, value: String },
}

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// The mined portion of a block. Field order here is the preimage order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Header format version.
    pub version: u32,
    /// Hash of the previous block, or all zeros for the first.
    pub prev_hash: String,
    /// Commitment to the work-item ids in this block.
    pub merkle_root: String,
    /// Milliseconds since epoch. Refreshed during the nonce search, so the
    /// final value is close to the moment the block was actually found.
    pub timestamp: u64,
    /// Display difficulty at mining time (leading zero hex chars of the
    /// target). Informational; the authoritative threshold is the target.
    pub bits: u32,
    /// The winning nonce.
    pub nonce: u64,
    /// Settlement-chain address of the miner.
    pub miner_address: String,
}

impl BlockHeader {
    /// The canonical colon-joined preimage string.
    pub fn serialize(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.version,
            self.prev_hash,
            self.merkle_root,
            self.timestamp,
            self.bits,
            self.nonce,
            self.miner_address,
        )
    }

    /// Parse a header back out of its preimage string.
    ///
    /// `miner_address` is the final field and takes the remainder, so an
    /// address containing `:` would round-trip, but no settlement-chain
    /// address format does.
    pub fn parse(serialized: &str) -> Result<Self, HeaderParseError> {
        let fields: Vec<&str> = serialized.splitn(7, ':').collect();
        if fields.len() != 7 {
            return Err(HeaderParseError::FieldCount(fields.len()));
        }

        let number = |field: &'static str, value: &str| -> Result<u64, HeaderParseError> {
            value.parse::<u64>().map_err(|_| HeaderParseError::BadNumber {
                field,
                value: value.to_string(),
            })
        };

        Ok(Self {
            version: number("version", fields[0])? as u32,
            prev_hash: fields[1].to_string(),
            merkle_root: fields[2].to_string(),
            timestamp: number("timestamp", fields[3])?,
            bits: number("bits", fields[4])? as u32,
            nonce: number("nonce", fields[5])?,
            miner_address: fields[6].to_string(),
        })
    }

    /// Double-SHA-256 of the preimage, lowercase hex. This is the block
    /// hash and the quantity compared against the target.
    pub fn hash(&self) -> String {
        double_sha256_hex(self.serialize().as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Merkle root
// ---------------------------------------------------------------------------

/// Commitment over a batch of work-item ids: sort ascending, join with
/// `|`, single SHA-256. Order independence falls out of the sort.
pub fn merkle_root_for_ids(ids: &[String]) -> String {
    if ids.is_empty() {
        return sha256_hex(b"empty");
    }
    let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sha256_hex(sorted.join("|").as_bytes())
}

/// Convenience form over whole items.
pub fn merkle_root_for_items(items: &[WorkItem]) -> String {
    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
    merkle_root_for_ids(&ids)
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A full PoI block: mined header, the work it commits to, and the local
/// bookkeeping attached after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Mined header.
    pub header: BlockHeader,
    /// Work items in inclusion order.
    pub items: Vec<WorkItem>,
    /// Cached header hash, lowercase hex.
    pub hash: String,
    /// Height as counted by the mining node.
    pub height: u64,
    /// Whether this node mined the block.
    pub is_own: bool,
    /// Settlement txid of the claim, attached once broadcast succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint_txid: Option<String>,
    /// The 64-hex target the block was mined against.
    pub target: String,
}

impl Block {
    /// Assemble a block from a solved header. Computes and caches the
    /// header hash.
    pub fn assemble(
        header: BlockHeader,
        items: Vec<WorkItem>,
        height: u64,
        is_own: bool,
        target: String,
    ) -> Self {
        let hash = header.hash();
        Self {
            header,
            items,
            hash,
            height,
            is_own,
            mint_txid: None,
            target,
        }
    }

    /// Recompute-and-compare integrity check: the cached hash must match
    /// the header, and the header's Merkle root must match the items.
    /// Used on announced blocks before they are persisted.
    pub fn verify(&self) -> Result<(), String> {
        let expected_hash = self.header.hash();
        if self.hash != expected_hash {
            return Err(format!(
                "block hash mismatch: stored={}, computed={}",
                self.hash, expected_hash
            ));
        }
        let expected_root = merkle_root_for_items(&self.items);
        if self.header.merkle_root != expected_root {
            return Err(format!(
                "merkle root mismatch: stored={}, computed={}",
                self.header.merkle_root, expected_root
            ));
        }
        Ok(())
    }

    /// Number of work items committed.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::work::WorkKind;
    use serde_json::json;

    fn item(id: &str) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            kind: WorkKind::Validation,
            data: json!({}),
            timestamp: 1_700_000_000_000,
        }
    }

    fn test_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: GENESIS_PREV_HASH.to_string(),
            merkle_root: "abc123".to_string(),
            timestamp: 1_700_000_000_000,
            bits: 3,
            nonce: 42,
            miner_address: "1TestAddress".to_string(),
        }
    }

    // -- Header serialization & hashing --------------------------------------

    #[test]
    fn header_serializes_colon_joined() {
        let header = test_header();
        let expected = format!(
            "1:{}:abc123:1700000000000:3:42:1TestAddress",
            GENESIS_PREV_HASH
        );
        assert_eq!(header.serialize(), expected);
    }

    #[test]
    fn header_hash_pinned_vector() {
        // Double-SHA-256 of the serialization above. Pinned so the hash
        // construction can never silently drift between releases.
        let header = test_header();
        assert_eq!(
            header.hash(),
            "0bd46a78723952c17e0aefaa1e7d9a670dd91cab74fe04b96c61210f635de6b1"
        );
    }

    #[test]
    fn header_hash_is_64_lowercase_hex_and_deterministic() {
        let header = test_header();
        let h1 = header.hash();
        let h2 = header.hash();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn header_parse_roundtrip() {
        let header = test_header();
        let parsed = BlockHeader::parse(&header.serialize()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_parse_rejects_short_input() {
        assert_eq!(
            BlockHeader::parse("1:2:3"),
            Err(HeaderParseError::FieldCount(3))
        );
    }

    #[test]
    fn header_parse_rejects_bad_numbers() {
        let garbled = format!("x:{}:root:1:2:3:addr", GENESIS_PREV_HASH);
        assert!(matches!(
            BlockHeader::parse(&garbled),
            Err(HeaderParseError::BadNumber { field: "version", .. })
        ));
    }

    // -- Merkle root ---------------------------------------------------------

    #[test]
    fn merkle_root_empty_batch() {
        // SHA256("empty"), pinned.
        assert_eq!(
            merkle_root_for_ids(&[]),
            "2e1cfa82b035c26cbbbdae632cea070514eb8b773f616aaeaf668e2f0be8f10d"
        );
    }

    #[test]
    fn merkle_root_known_vector() {
        // SHA256("alpha|bravo|charlie"), sorted regardless of input order.
        let ids = vec![
            "charlie".to_string(),
            "alpha".to_string(),
            "bravo".to_string(),
        ];
        assert_eq!(
            merkle_root_for_ids(&ids),
            "74edf07a2e8b5ea9ccfa812a976860b8f4e6c8cd3e42798864fcb1ce5bcbdb16"
        );
    }

    #[test]
    fn merkle_root_is_order_independent() {
        let forward = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let shuffled = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(merkle_root_for_ids(&forward), merkle_root_for_ids(&shuffled));
    }

    #[test]
    fn merkle_root_items_matches_ids() {
        let items = vec![item("charlie"), item("alpha"), item("bravo")];
        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(merkle_root_for_items(&items), merkle_root_for_ids(&ids));
    }

    // -- Block ---------------------------------------------------------------

    #[test]
    fn assembled_block_verifies() {
        let items = vec![item("alpha"), item("bravo")];
        let mut header = test_header();
        header.merkle_root = merkle_root_for_items(&items);

        let block = Block::assemble(header, items, 1, true, "f".repeat(64));
        assert!(block.verify().is_ok());
        assert_eq!(block.item_count(), 2);
        assert!(block.mint_txid.is_none());
    }

    #[test]
    fn tampered_hash_fails_verify() {
        let items = vec![item("alpha")];
        let mut header = test_header();
        header.merkle_root = merkle_root_for_items(&items);
        let mut block = Block::assemble(header, items, 1, true, "f".repeat(64));

        block.hash = "00".repeat(32);
        assert!(block.verify().is_err());
    }

    #[test]
    fn tampered_items_fail_verify() {
        let items = vec![item("alpha")];
        let mut header = test_header();
        header.merkle_root = merkle_root_for_items(&items);
        let mut block = Block::assemble(header, items, 1, true, "f".repeat(64));

        block.items.push(item("smuggled"));
        assert!(block.verify().is_err());
    }

    #[test]
    fn block_serde_roundtrip() {
        let items = vec![item("alpha")];
        let mut header = test_header();
        header.merkle_root = merkle_root_for_items(&items);
        let block = Block::assemble(header, items, 7, false, "f".repeat(64));

        let json_str = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json_str).unwrap();
        assert_eq!(block, back);
        // mint_txid stays off the wire until set.
        assert!(!json_str.contains("mint_txid"));
    }
}
