//! # Commitment Script
//!
//! Builds the OP_RETURN output that anchors a PoI block's Merkle root on
//! the settlement chain:
//!
//! ```text
//! OP_FALSE OP_RETURN <"$402"> <"poi"> <token_id> <merkle_root_bytes> <miner_address>
//! ```
//!
//! Five pushdata items, exactly in that order. `merkle_root_bytes` is the
//! hex-decoded form when the input parses as hex, the raw UTF-8 bytes
//! otherwise.

use crate::config;

/// Script opcodes this module needs. The settlement chain speaks Bitcoin
/// script; we only ever emit these.
pub const OP_FALSE: u8 = 0x00;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;

/// Minimal pushdata encoding for a byte string.
pub fn push_data(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 5);
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(OP_PUSHDATA1);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(OP_PUSHDATA2);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        out.push(OP_PUSHDATA4);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
    out
}

/// Hex-decode when the string is well-formed hex, otherwise take the raw
/// UTF-8 bytes. Merkle roots are always hex in practice; the fallback
/// keeps a hand-entered token id from aborting a claim.
pub fn hex_or_utf8_bytes(s: &str) -> Vec<u8> {
    if !s.is_empty() && s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(s).unwrap_or_else(|_| s.as_bytes().to_vec())
    } else {
        s.as_bytes().to_vec()
    }
}

/// The full commitment script for one mined block.
pub fn claim_script(token_id: &str, merkle_root: &str, miner_address: &str) -> Vec<u8> {
    let mut script = vec![OP_FALSE, OP_RETURN];
    script.extend(push_data(config::CLAIM_PROTOCOL_TAG.as_bytes()));
    script.extend(push_data(config::CLAIM_ACTION.as_bytes()));
    script.extend(push_data(token_id.as_bytes()));
    script.extend(push_data(&hex_or_utf8_bytes(merkle_root)));
    script.extend(push_data(miner_address.as_bytes()));
    script
}

/// Standard P2PKH locking script for a 20-byte public key hash.
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_data_small() {
        let encoded = push_data(b"poi");
        assert_eq!(encoded, vec![3, b'p', b'o', b'i']);
    }

    #[test]
    fn push_data_one_byte_length() {
        let data = vec![0xaa; 100];
        let encoded = push_data(&data);
        assert_eq!(encoded[0], OP_PUSHDATA1);
        assert_eq!(encoded[1], 100);
        assert_eq!(&encoded[2..], &data[..]);
    }

    #[test]
    fn push_data_two_byte_length() {
        let data = vec![0xbb; 300];
        let encoded = push_data(&data);
        assert_eq!(encoded[0], OP_PUSHDATA2);
        assert_eq!(u16::from_le_bytes([encoded[1], encoded[2]]), 300);
    }

    #[test]
    fn hex_input_is_decoded() {
        assert_eq!(hex_or_utf8_bytes("deadbeef"), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn non_hex_input_is_utf8() {
        assert_eq!(hex_or_utf8_bytes("token-42"), b"token-42".to_vec());
        // Odd length can't be hex even if the chars are.
        assert_eq!(hex_or_utf8_bytes("abc"), b"abc".to_vec());
    }

    #[test]
    fn claim_script_layout() {
        let merkle = "ab".repeat(32);
        let script = claim_script("tok1", &merkle, "1Miner");

        assert_eq!(script[0], OP_FALSE);
        assert_eq!(script[1], OP_RETURN);

        // Walk the five pushes in order.
        let mut cursor = 2;
        let mut items = Vec::new();
        while cursor < script.len() {
            let len = script[cursor] as usize;
            assert!(len < OP_PUSHDATA1 as usize, "all claim items are short pushes");
            cursor += 1;
            items.push(script[cursor..cursor + len].to_vec());
            cursor += len;
        }

        assert_eq!(items.len(), 5);
        assert_eq!(items[0], b"$402");
        assert_eq!(items[1], b"poi");
        assert_eq!(items[2], b"tok1");
        assert_eq!(items[3], hex::decode(&merkle).unwrap());
        assert_eq!(items[4], b"1Miner");
    }

    #[test]
    fn p2pkh_script_shape() {
        let script = p2pkh_script(&[0x11; 20]);
        assert_eq!(script.len(), 25);
        assert_eq!(script[0], OP_DUP);
        assert_eq!(script[1], OP_HASH160);
        assert_eq!(script[2], 20);
        assert_eq!(script[23], OP_EQUALVERIFY);
        assert_eq!(script[24], OP_CHECKSIG);
    }
}
