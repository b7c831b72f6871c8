//! # Node Identity Keys
//!
//! Ed25519 keypair behind every P402 node identity.
//!
//! The same 32-byte seed backs two identities that must stay in sync:
//! the gossip-layer `sender_id` (hex public key, written into every
//! envelope) and the libp2p transport keypair (from which the peer id is
//! derived). Deriving both from one seed means a node that persists its
//! key keeps both identities across restarts, and a node that opts into
//! an ephemeral identity loses both together.
//!
//! ## Security considerations
//!
//! - Key generation uses the OS RNG (`OsRng`). If your OS RNG is broken,
//!   you have bigger problems than P402.
//! - Key bytes are never logged. If you add logging to this module,
//!   you will be asked to leave.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during key operations.
///
/// Intentionally vague about *why* something failed; leaking details
/// about key material through error messages is a classic footgun.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature bytes: wrong length")]
    InvalidSignature,
}

// ---------------------------------------------------------------------------
// NodeKeypair
// ---------------------------------------------------------------------------

/// The Ed25519 keypair backing a node's network identity.
///
/// Intentionally does NOT implement `Serialize`/`Deserialize`. Persisting
/// a private key should be a deliberate act, not something that happens
/// because someone shoved a keypair into a JSON response. Use
/// [`secret_key_bytes`](Self::secret_key_bytes) / [`from_hex`](Self::from_hex)
/// explicitly.
pub struct NodeKeypair {
    signing_key: SigningKey,
}

/// The public half of a node identity, safe to share with the world.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePublicKey {
    bytes: [u8; 32],
}

impl NodeKeypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Construct a keypair deterministically from a 32-byte seed. In
    /// Ed25519 the 32-byte secret key *is* the seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Reconstruct a keypair from a hex-encoded secret key, as written by
    /// the node's `init` command.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(KeyError::InvalidSecretKey);
        }
        let mut arr = [0u8; SECRET_KEY_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self::from_seed(&arr))
    }

    /// Raw 32-byte secret key, for explicit persistence only.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The public key associated with this keypair.
    pub fn public_key(&self) -> NodePublicKey {
        NodePublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// The gossip-layer sender id: the hex-encoded public key. This is the
    /// stable per-node identifier written into every envelope, distinct
    /// from the libp2p peer id.
    pub fn sender_id(&self) -> String {
        hex::encode(self.public_key().bytes)
    }

    /// Sign an arbitrary message, returning the 64-byte signature as hex.
    /// Envelope signatures on the wire are hex strings.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        let sig = self.signing_key.sign(message);
        hex::encode(sig.to_bytes())
    }

    /// Derive the libp2p transport keypair from the same seed, so the
    /// transport peer id survives restarts together with the sender id.
    pub fn libp2p_keypair(&self) -> libp2p::identity::Keypair {
        let mut seed = self.signing_key.to_bytes();
        libp2p::identity::Keypair::ed25519_from_bytes(&mut seed)
            .expect("32-byte ed25519 seed is always valid")
    }
}

impl Clone for NodeKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secret stays secret; only the public half is printable.
        f.debug_struct("NodeKeypair")
            .field("public", &self.sender_id())
            .finish()
    }
}

impl NodePublicKey {
    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Hex form, identical to the envelope `sender_id`.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse a public key from its hex sender-id form.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|_| KeyError::InvalidPublicKey)?;
        if bytes.len() != 32 {
            return Err(KeyError::InvalidPublicKey);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self { bytes: arr })
    }

    /// Verify a hex-encoded signature over a message. Returns `false` for
    /// malformed signatures rather than erroring; the gossip layer treats
    /// a bad signature and a wrong signature identically.
    pub fn verify_hex(&self, message: &[u8], signature_hex: &str) -> bool {
        let Ok(sig_bytes) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
            return false;
        };
        let Ok(verifying) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let signature = DalekSignature::from_bytes(&sig_arr);
        verifying.verify(message, &signature).is_ok()
    }
}

impl fmt::Debug for NodePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePublicKey({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_sign_roundtrip() {
        let kp = NodeKeypair::generate();
        let msg = b"announce token abc";
        let sig = kp.sign_hex(msg);
        assert!(kp.public_key().verify_hex(msg, &sig));
        assert!(!kp.public_key().verify_hex(b"different message", &sig));
    }

    #[test]
    fn from_seed_is_deterministic() {
        let seed = [7u8; 32];
        let a = NodeKeypair::from_seed(&seed);
        let b = NodeKeypair::from_seed(&seed);
        assert_eq!(a.sender_id(), b.sender_id());
    }

    #[test]
    fn hex_save_load_roundtrip() {
        let kp = NodeKeypair::generate();
        let hex_str = hex::encode(kp.secret_key_bytes());
        let loaded = NodeKeypair::from_hex(&hex_str).unwrap();
        assert_eq!(kp.sender_id(), loaded.sender_id());
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(NodeKeypair::from_hex("not hex at all").is_err());
        assert!(NodeKeypair::from_hex("abcd").is_err()); // too short
    }

    #[test]
    fn sender_id_is_64_hex_chars() {
        let kp = NodeKeypair::generate();
        let id = kp.sender_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn libp2p_identity_is_stable_across_derivations() {
        let kp = NodeKeypair::from_seed(&[42u8; 32]);
        let p1 = kp.libp2p_keypair().public().to_peer_id();
        let p2 = kp.libp2p_keypair().public().to_peer_id();
        assert_eq!(p1, p2);
    }

    #[test]
    fn malformed_signature_fails_closed() {
        let kp = NodeKeypair::generate();
        let pk = kp.public_key();
        assert!(!pk.verify_hex(b"msg", "zz not hex"));
        assert!(!pk.verify_hex(b"msg", "abcd")); // wrong length
    }
}
