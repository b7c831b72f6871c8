//! # Hashing Utilities
//!
//! SHA-256 in its single and double forms. That's it: the P402 wire
//! contract is SHA-256 end to end: envelope fingerprints are truncated
//! single hashes, block hashes are double hashes interpreted big-endian,
//! and Merkle roots hash a canonical string. Adding a second hash function
//! here needs a better reason than fashion.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// Returns a 32-byte digest as a `Vec<u8>`. Why `Vec<u8>` and not
/// `[u8; 32]`? Because half the callers immediately pass it to functions
/// that want `&[u8]`, and the other half want to chain it into
/// [`double_sha256`]. The heap allocation is noise compared to the cost of
/// the hash itself.
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Compute the SHA-256 hash and return a fixed-size array.
///
/// Same as [`sha256`] but returns `[u8; 32]` for callers that want a
/// fixed-size type without the heap allocation.
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// SHA-256 as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_array(data))
}

/// Compute the double-SHA-256 hash: `SHA-256(SHA-256(data))`.
///
/// Used for block header hashes. The double-hash construction matches the
/// settlement chain's transaction-id convention, so a PoI block hash and an
/// on-chain txid are directly comparable quantities.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256_array(&sha256(data))
}

/// Double-SHA-256 as a lowercase hex string.
pub fn double_sha256_hex(data: &[u8]) -> String {
    hex::encode(double_sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of empty string, the canonical test vector everyone
        // should have memorized by now.
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash, expected);
    }

    #[test]
    fn sha256_array_matches_vec() {
        let vec_result = sha256(b"test data");
        let arr_result = sha256_array(b"test data");
        assert_eq!(vec_result.as_slice(), arr_result.as_slice());
    }

    #[test]
    fn double_sha256_known_vector() {
        // SHA-256(SHA-256("Hello World")), pinned so the block hash
        // construction can never silently drift.
        assert_eq!(
            double_sha256_hex(b"Hello World"),
            "42a873ac3abd02122d27e80486c6fa1ef78694e8505fcec9cbcc8a7728ba8949"
        );
    }

    #[test]
    fn double_sha256_differs_from_single() {
        let single = sha256(b"p402");
        let double = double_sha256(b"p402");
        assert_ne!(single.as_slice(), double.as_slice());

        // But double should equal SHA-256 of the single hash.
        let manual = sha256_array(&single);
        assert_eq!(double, manual);
    }

    #[test]
    fn hex_forms_are_lowercase() {
        let h = double_sha256_hex(b"case check");
        assert_eq!(h, h.to_lowercase());
        assert_eq!(h.len(), 64);
    }
}
