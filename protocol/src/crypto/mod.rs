//! Cryptographic primitives: SHA-256 hashing and the node identity keys.

pub mod hash;
pub mod keys;

pub use hash::{double_sha256, double_sha256_hex, sha256, sha256_array, sha256_hex};
pub use keys::{KeyError, NodeKeypair, NodePublicKey};
