//! # Claim Transaction
//!
//! Raw settlement-chain transaction assembly and signing for PoI claims.
//! One OP_RETURN commitment output, one P2PKH change output back to the
//! funding address, inputs drawn from whatever UTXOs the provider hands
//! us. Fees are flat-rate per kilobyte.
//!
//! Signing is BIP143-style with the FORKID flag (`SIGHASH_ALL |
//! SIGHASH_FORKID`), the settlement chain's post-fork scheme. This module
//! is the entire "sign an OP_RETURN tx and broadcast" surface; wallet
//! management lives elsewhere.

use secp256k1::{Message, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::script::{p2pkh_script, push_data};
use crate::crypto::hash::double_sha256;

/// `SIGHASH_ALL | SIGHASH_FORKID`.
const SIGHASH_ALL_FORKID: u32 = 0x41;

/// Standard input sequence (no RBF semantics on the settlement chain).
const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Errors from transaction assembly and signing.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("invalid funding address: {0}")]
    BadAddress(String),

    #[error("invalid utxo field: {0}")]
    BadUtxo(String),

    #[error("inputs ({available} sats) do not cover the fee ({fee} sats)")]
    InsufficientFunds { available: u64, fee: u64 },

    #[error("signing failed: {0}")]
    Signing(String),
}

// ---------------------------------------------------------------------------
// Utxo
// ---------------------------------------------------------------------------

/// An unspent output as reported by the UTXO provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Funding transaction id, big-endian hex as displayed.
    pub txid: String,
    /// Output index within that transaction.
    pub vout: u32,
    /// Value in satoshis.
    pub satoshis: u64,
}

// ---------------------------------------------------------------------------
// ClaimTx
// ---------------------------------------------------------------------------

struct TxInput {
    /// Outpoint txid in internal (reversed) byte order.
    prev_txid: [u8; 32],
    prev_vout: u32,
    script_sig: Vec<u8>,
    /// Satoshis of the spent output; part of the FORKID sighash.
    value: u64,
}

struct TxOutput {
    value: u64,
    script_pubkey: Vec<u8>,
}

/// A claim transaction under construction.
pub struct ClaimTx {
    version: u32,
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    lock_time: u32,
    /// P2PKH locking script of the funding address; doubles as the BIP143
    /// scriptCode for every input.
    funding_script: Vec<u8>,
}

impl ClaimTx {
    /// Lay out the transaction: all provided UTXOs as inputs, the
    /// commitment as output 0, change back to the funding address as
    /// output 1. The change value is `sum(inputs) - fee`, with the fee
    /// computed from the estimated signed size at `fee_per_kb`.
    pub fn build(
        utxos: &[Utxo],
        commitment_script: Vec<u8>,
        funding_address: &str,
        fee_per_kb: u64,
    ) -> Result<Self, TxError> {
        let pubkey_hash = address_to_pubkey_hash(funding_address)?;
        let funding_script = p2pkh_script(&pubkey_hash);

        let mut inputs = Vec::with_capacity(utxos.len());
        let mut total_in: u64 = 0;
        for utxo in utxos {
            inputs.push(TxInput {
                prev_txid: txid_to_internal(&utxo.txid)?,
                prev_vout: utxo.vout,
                script_sig: Vec::new(),
                value: utxo.satoshis,
            });
            total_in += utxo.satoshis;
        }

        let mut tx = Self {
            version: 1,
            inputs,
            outputs: vec![
                TxOutput {
                    value: 0,
                    script_pubkey: commitment_script,
                },
                TxOutput {
                    value: 0, // patched below once the fee is known
                    script_pubkey: funding_script.clone(),
                },
            ],
            lock_time: 0,
            funding_script,
        };

        // 107 bytes covers a DER signature push plus a compressed pubkey
        // push, the worst-case script_sig we will produce.
        let estimated = tx.serialize().len() + tx.inputs.len() * 107;
        let fee = ((estimated as u64) * fee_per_kb).div_ceil(1000).max(1);
        if total_in <= fee {
            return Err(TxError::InsufficientFunds {
                available: total_in,
                fee,
            });
        }
        tx.outputs[1].value = total_in - fee;
        Ok(tx)
    }

    /// The fee this transaction pays (inputs minus outputs).
    pub fn fee(&self) -> u64 {
        let total_in: u64 = self.inputs.iter().map(|i| i.value).sum();
        let total_out: u64 = self.outputs.iter().map(|o| o.value).sum();
        total_in - total_out
    }

    /// Change value returned to the funding address.
    pub fn change_value(&self) -> u64 {
        self.outputs[1].value
    }

    /// Sign every input with the funding key and return the raw
    /// transaction hex, ready to broadcast.
    pub fn sign_and_serialize(&mut self, funding_key: &SecretKey) -> Result<String, TxError> {
        let secp = Secp256k1::signing_only();
        let pubkey = funding_key.public_key(&secp).serialize();

        for index in 0..self.inputs.len() {
            let digest = self.sighash(index);
            let message = Message::from_digest(digest);
            let signature = secp.sign_ecdsa(&message, funding_key);
            let mut der = signature.serialize_der().to_vec();
            der.push(SIGHASH_ALL_FORKID as u8);

            let mut script_sig = push_data(&der);
            script_sig.extend(push_data(&pubkey));
            self.inputs[index].script_sig = script_sig;
        }

        Ok(hex::encode(self.serialize()))
    }

    /// Raw wire serialization with whatever script_sigs are present.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&self.version.to_le_bytes());

        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(&input.prev_txid);
            out.extend_from_slice(&input.prev_vout.to_le_bytes());
            write_varint(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&SEQUENCE_FINAL.to_le_bytes());
        }

        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_varint(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(&output.script_pubkey);
        }

        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// BIP143 sighash for one input, FORKID variant.
    fn sighash(&self, index: usize) -> [u8; 32] {
        let input = &self.inputs[index];

        let mut prevouts = Vec::with_capacity(self.inputs.len() * 36);
        let mut sequences = Vec::with_capacity(self.inputs.len() * 4);
        for i in &self.inputs {
            prevouts.extend_from_slice(&i.prev_txid);
            prevouts.extend_from_slice(&i.prev_vout.to_le_bytes());
            sequences.extend_from_slice(&SEQUENCE_FINAL.to_le_bytes());
        }

        let mut outputs = Vec::new();
        for o in &self.outputs {
            outputs.extend_from_slice(&o.value.to_le_bytes());
            write_varint(&mut outputs, o.script_pubkey.len() as u64);
            outputs.extend_from_slice(&o.script_pubkey);
        }

        let mut preimage = Vec::with_capacity(200);
        preimage.extend_from_slice(&self.version.to_le_bytes());
        preimage.extend_from_slice(&double_sha256(&prevouts));
        preimage.extend_from_slice(&double_sha256(&sequences));
        preimage.extend_from_slice(&input.prev_txid);
        preimage.extend_from_slice(&input.prev_vout.to_le_bytes());
        write_varint(&mut preimage, self.funding_script.len() as u64);
        preimage.extend_from_slice(&self.funding_script);
        preimage.extend_from_slice(&input.value.to_le_bytes());
        preimage.extend_from_slice(&SEQUENCE_FINAL.to_le_bytes());
        preimage.extend_from_slice(&double_sha256(&outputs));
        preimage.extend_from_slice(&self.lock_time.to_le_bytes());
        preimage.extend_from_slice(&SIGHASH_ALL_FORKID.to_le_bytes());

        double_sha256(&preimage)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Decode a base58check P2PKH address to its 20-byte public key hash.
pub fn address_to_pubkey_hash(address: &str) -> Result<[u8; 20], TxError> {
    let decoded = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| TxError::BadAddress(e.to_string()))?;
    // Version byte + 20-byte hash.
    if decoded.len() != 21 {
        return Err(TxError::BadAddress(format!(
            "expected 21 decoded bytes, got {}",
            decoded.len()
        )));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&decoded[1..]);
    Ok(hash)
}

/// Display-order txid hex to internal (reversed) bytes.
fn txid_to_internal(txid: &str) -> Result<[u8; 32], TxError> {
    let bytes = hex::decode(txid).map_err(|e| TxError::BadUtxo(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(TxError::BadUtxo(format!(
            "txid must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    for (i, b) in bytes.iter().rev().enumerate() {
        out[i] = *b;
    }
    Ok(out)
}

/// Bitcoin-style variable-length integer.
fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// The txid of a serialized transaction: double-SHA256, displayed
/// byte-reversed.
pub fn txid_of(raw: &[u8]) -> String {
    let mut digest = double_sha256(raw);
    digest.reverse();
    hex::encode(digest)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
