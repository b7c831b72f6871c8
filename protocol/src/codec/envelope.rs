//! # Gossip Envelope
//!
//! The wire format every overlay message travels in: canonical JSON with a
//! fixed field order, a size cap, hop/TTL relay accounting, and a content
//! fingerprint for deduplication.
//!
//! ## Fingerprinting
//!
//! The dedup fingerprint deliberately covers only `type`, `sender_id`, and
//! `payload`, and not `id`, `timestamp`, `ttl`, or `hops`. A sender that
//! retransmits the same announcement under a fresh message id still dedups
//! to the same fingerprint, and a relayed copy (hops+1) fingerprints
//! identically to the original.
//!
//! The codec never blocks and never does I/O; every failure is a value
//! returned to the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::codec::MessageType;
use crate::config;
use crate::crypto::hash::sha256_hex;
use crate::util::unix_millis;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Codec-level failures. All recoverable; the caller drops the message and
/// moves on.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialized form exceeds `MAX_MESSAGE_SIZE`.
    #[error("message too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    /// Not valid JSON, or not a valid envelope shape.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Why `validate` rejected an otherwise well-formed envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("negative ttl: {0}")]
    NegativeTtl(i64),

    #[error("negative hops: {0}")]
    NegativeHops(i64),

    #[error("hop limit exceeded: {hops} > {max}")]
    TooManyHops { hops: i64, max: u32 },

    #[error("expired: age {age_secs}s exceeds ttl {ttl}s")]
    Expired { age_secs: i64, ttl: i64 },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One gossip message. Field declaration order is the wire order: serde
/// serializes structs in declaration order, and peers fingerprint off the
/// canonical form, so reordering fields here is a protocol change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// 128-bit random id, hex. Unique per emission, excluded from the
    /// fingerprint.
    pub id: String,
    /// Message type tag.
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Protocol version of the sender.
    pub version: String,
    /// Stable per-node identifier (hex public key), distinct from the
    /// transport peer id.
    pub sender_id: String,
    /// Milliseconds since epoch at emission.
    pub timestamp: u64,
    /// Seconds of validity from `timestamp`. Signed on the wire so a
    /// negative value is rejected in validation rather than failing parse.
    pub ttl: i64,
    /// Relay hop count. Incremented on each relay, never on the original.
    pub hops: i64,
    /// Typed payload, opaque to the router.
    pub payload: Value,
    /// Optional sender signature (hex). Carried, not validated, by the
    /// core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Envelope {
    /// Build a fresh envelope around a typed payload. The id is 128 random
    /// bits as 32 hex chars; timestamp is now; ttl and version come from
    /// protocol constants.
    pub fn new<P: Serialize>(msg_type: MessageType, sender_id: &str, payload: &P) -> Self {
        let payload =
            serde_json::to_value(payload).expect("payload types serialize infallibly");
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            msg_type,
            version: config::PROTOCOL_VERSION.to_string(),
            sender_id: sender_id.to_string(),
            timestamp: unix_millis(),
            ttl: config::MESSAGE_TTL as i64,
            hops: 0,
            payload,
            signature: None,
        }
    }

    /// Canonical JSON bytes, or `TooLarge`.
    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        if bytes.len() > config::MAX_MESSAGE_SIZE {
            return Err(CodecError::TooLarge {
                size: bytes.len(),
                limit: config::MAX_MESSAGE_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Parse an envelope off the wire. Size is checked before parsing so an
    /// oversized blob never reaches the JSON parser.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > config::MAX_MESSAGE_SIZE {
            return Err(CodecError::TooLarge {
                size: bytes.len(),
                limit: config::MAX_MESSAGE_SIZE,
            });
        }
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    /// Structural and freshness validation against a caller-supplied clock
    /// (milliseconds). Field presence beyond what the type system already
    /// guarantees: empty strings and a null payload count as missing.
    pub fn validate(&self, now_ms: u64) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.version.is_empty() {
            return Err(ValidationError::MissingField("version"));
        }
        if self.sender_id.is_empty() {
            return Err(ValidationError::MissingField("sender_id"));
        }
        if self.timestamp == 0 {
            return Err(ValidationError::MissingField("timestamp"));
        }
        if self.payload.is_null() {
            return Err(ValidationError::MissingField("payload"));
        }
        if self.ttl < 0 {
            return Err(ValidationError::NegativeTtl(self.ttl));
        }
        if self.hops < 0 {
            return Err(ValidationError::NegativeHops(self.hops));
        }
        if self.hops > config::MAX_HOPS as i64 {
            return Err(ValidationError::TooManyHops {
                hops: self.hops,
                max: config::MAX_HOPS,
            });
        }
        let age_secs = self.age_secs(now_ms);
        if age_secs > self.ttl {
            return Err(ValidationError::Expired {
                age_secs,
                ttl: self.ttl,
            });
        }
        Ok(())
    }

    /// Envelope age in whole seconds at `now_ms`. A clock that ran
    /// backwards yields 0, not a negative age.
    pub fn age_secs(&self, now_ms: u64) -> i64 {
        (now_ms.saturating_sub(self.timestamp) / 1000) as i64
    }

    /// 16-byte dedup fingerprint, hex encoded.
    ///
    /// Hashes exactly `{"type":"<T>","sender_id":"<S>","payload":<P>}`,
    /// the subset of fields that make two emissions "the same message".
    /// The payload renders with sorted object keys, so semantically equal
    /// payloads fingerprint equally regardless of construction order.
    pub fn fingerprint(&self) -> String {
        let payload_json =
            serde_json::to_string(&self.payload).expect("Value serializes infallibly");
        let fp_string = format!(
            "{{\"type\":\"{}\",\"sender_id\":\"{}\",\"payload\":{}}}",
            self.msg_type.as_str(),
            self.sender_id,
            payload_json,
        );
        let mut digest = sha256_hex(fp_string.as_bytes());
        digest.truncate(32);
        digest
    }

    /// Produce the relayed copy: same message, hops+1. Returns `None` when
    /// the envelope has expired or is out of hops; the input is never
    /// mutated.
    pub fn prepare_for_relay(&self, now_ms: u64) -> Option<Envelope> {
        if self.age_secs(now_ms) > self.ttl {
            return None;
        }
        if self.hops >= config::MAX_HOPS as i64 {
            return None;
        }
        let mut copy = self.clone();
        copy.hops += 1;
        Some(copy)
    }

    /// Decode the payload into its typed form.
    pub fn payload_as<P: for<'de> Deserialize<'de>>(&self) -> Result<P, CodecError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CodecError::Malformed(format!("payload: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::payload::Ping;
    use serde_json::json;

    fn ping_envelope(id: &str, sender: &str) -> Envelope {
        let mut env = Envelope::new(
            MessageType::Ping,
            sender,
            &Ping {
                timestamp: 1,
                nonce: "x".to_string(),
            },
        );
        env.id = id.to_string();
        env
    }

    // -- Fingerprint canonicalization ---------------------------------------

    #[test]
    fn fingerprint_ignores_id_timestamp_ttl_hops() {
        let a = ping_envelope("A", "n1");
        let mut b = ping_envelope("B", "n1");
        b.timestamp = a.timestamp + 5_000;
        b.ttl = 60;
        b.hops = 3;

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_by_sender() {
        let a = ping_envelope("A", "n1");
        let c = ping_envelope("A", "n2");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn fingerprint_is_32_hex_chars() {
        let fp = ping_envelope("A", "n1").fingerprint();
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_stable_under_clone_and_relay() {
        let env = ping_envelope("A", "n1");
        assert_eq!(env.fingerprint(), env.clone().fingerprint());

        let relayed = env.prepare_for_relay(env.timestamp).unwrap();
        assert_eq!(env.fingerprint(), relayed.fingerprint());
    }

    #[test]
    fn fingerprint_canonicalizes_payload_key_order() {
        let mut a = ping_envelope("A", "n1");
        let mut b = ping_envelope("B", "n1");
        a.payload = json!({"timestamp": 1, "nonce": "x"});
        b.payload = json!({"nonce": "x", "timestamp": 1});
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    // -- Round trip ----------------------------------------------------------

    #[test]
    fn serialize_deserialize_roundtrip() {
        let env = ping_envelope("abc123", "n1");
        let bytes = env.serialize().unwrap();
        let back = Envelope::deserialize(&bytes).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn wire_field_order_is_fixed() {
        let env = ping_envelope("abc", "n1");
        let json = String::from_utf8(env.serialize().unwrap()).unwrap();
        let id_pos = json.find("\"id\"").unwrap();
        let type_pos = json.find("\"type\"").unwrap();
        let version_pos = json.find("\"version\"").unwrap();
        let sender_pos = json.find("\"sender_id\"").unwrap();
        let ts_pos = json.find("\"timestamp\"").unwrap();
        let ttl_pos = json.find("\"ttl\"").unwrap();
        let hops_pos = json.find("\"hops\"").unwrap();
        let payload_pos = json.find("\"payload\"").unwrap();
        assert!(id_pos < type_pos);
        assert!(type_pos < version_pos);
        assert!(version_pos < sender_pos);
        assert!(sender_pos < ts_pos);
        assert!(ts_pos < ttl_pos);
        assert!(ttl_pos < hops_pos);
        assert!(hops_pos < payload_pos);
    }

    #[test]
    fn absent_signature_stays_off_the_wire() {
        let env = ping_envelope("abc", "n1");
        let json = String::from_utf8(env.serialize().unwrap()).unwrap();
        assert!(!json.contains("signature"));
    }

    // -- Size limits ---------------------------------------------------------

    #[test]
    fn oversized_envelope_rejected_on_serialize() {
        let mut env = ping_envelope("abc", "n1");
        env.payload = json!({"blob": "z".repeat(config::MAX_MESSAGE_SIZE)});
        match env.serialize() {
            Err(CodecError::TooLarge { size, limit }) => {
                assert!(size > limit);
                assert_eq!(limit, config::MAX_MESSAGE_SIZE);
            }
            other => panic!("expected TooLarge, got {:?}", other),
        }
    }

    #[test]
    fn oversized_bytes_rejected_before_parse() {
        let blob = vec![b'{'; config::MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            Envelope::deserialize(&blob),
            Err(CodecError::TooLarge { .. })
        ));
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        assert!(matches!(
            Envelope::deserialize(b"not json"),
            Err(CodecError::Malformed(_))
        ));
        // Valid JSON, wrong shape.
        assert!(matches!(
            Envelope::deserialize(b"{\"id\":\"x\"}"),
            Err(CodecError::Malformed(_))
        ));
    }

    // -- Validation ----------------------------------------------------------

    #[test]
    fn fresh_envelope_validates() {
        let env = ping_envelope("abc", "n1");
        assert!(env.validate(env.timestamp).is_ok());
    }

    #[test]
    fn validation_rejects_empty_fields() {
        let now = unix_millis();
        let mut env = ping_envelope("abc", "n1");
        env.id.clear();
        assert_eq!(
            env.validate(now),
            Err(ValidationError::MissingField("id"))
        );

        let mut env = ping_envelope("abc", "n1");
        env.sender_id.clear();
        assert_eq!(
            env.validate(now),
            Err(ValidationError::MissingField("sender_id"))
        );

        let mut env = ping_envelope("abc", "n1");
        env.payload = Value::Null;
        assert_eq!(
            env.validate(now),
            Err(ValidationError::MissingField("payload"))
        );
    }

    #[test]
    fn validation_rejects_negative_ttl_and_hops() {
        let mut env = ping_envelope("abc", "n1");
        env.ttl = -1;
        assert_eq!(
            env.validate(env.timestamp),
            Err(ValidationError::NegativeTtl(-1))
        );

        let mut env = ping_envelope("abc", "n1");
        env.hops = -1;
        assert_eq!(
            env.validate(env.timestamp),
            Err(ValidationError::NegativeHops(-1))
        );
    }

    #[test]
    fn validation_rejects_hop_overflow() {
        let mut env = ping_envelope("abc", "n1");
        env.hops = config::MAX_HOPS as i64 + 1;
        assert!(matches!(
            env.validate(env.timestamp),
            Err(ValidationError::TooManyHops { .. })
        ));
        // Exactly at the limit is still deliverable.
        env.hops = config::MAX_HOPS as i64;
        assert!(env.validate(env.timestamp).is_ok());
    }

    #[test]
    fn validation_rejects_expired() {
        let env = ping_envelope("abc", "n1");
        let after_expiry = env.timestamp + (env.ttl as u64 + 1) * 1000;
        assert!(matches!(
            env.validate(after_expiry),
            Err(ValidationError::Expired { .. })
        ));
        // One second inside the window is fine.
        let within = env.timestamp + (env.ttl as u64 - 1) * 1000;
        assert!(env.validate(within).is_ok());
    }

    // -- Relay ---------------------------------------------------------------

    #[test]
    fn relay_increments_hops_and_preserves_original() {
        let env = ping_envelope("abc", "n1");
        let relayed = env.prepare_for_relay(env.timestamp).unwrap();
        assert_eq!(relayed.hops, env.hops + 1);
        assert_eq!(env.hops, 0, "input must not be mutated");
        assert_eq!(relayed.id, env.id);
    }

    #[test]
    fn relay_refuses_at_hop_limit() {
        let mut env = ping_envelope("abc", "n1");
        env.hops = config::MAX_HOPS as i64;
        assert!(env.prepare_for_relay(env.timestamp).is_none());

        env.hops = config::MAX_HOPS as i64 - 1;
        let relayed = env.prepare_for_relay(env.timestamp).unwrap();
        assert_eq!(relayed.hops, config::MAX_HOPS as i64);
    }

    #[test]
    fn relay_refuses_expired() {
        let env = ping_envelope("abc", "n1");
        let after_expiry = env.timestamp + (env.ttl as u64 + 1) * 1000;
        assert!(env.prepare_for_relay(after_expiry).is_none());
    }

    #[test]
    fn new_envelope_has_random_128_bit_id() {
        let a = Envelope::new(MessageType::Ping, "n1", &json!({"t": 1}));
        let b = Envelope::new(MessageType::Ping, "n1", &json!({"t": 1}));
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
    }
}
