//! # Claim Pipeline
//!
//! Turns a mined block's Merkle root into an on-chain commitment: fetch
//! UTXOs, build and sign the OP_RETURN transaction, broadcast, and retry
//! under UTXO contention, the failure class where another actor spent a
//! funding output between our fetch and our broadcast.
//!
//! The pipeline is generic over [`UtxoProvider`] and [`Broadcaster`] so
//! the whole flow is testable without a network; the HTTP implementations
//! at the bottom are what the node wires in production.
//!
//! At-most-once is NOT guaranteed across restarts: a crash after
//! broadcast but before the mint txid is persisted can re-issue a claim.
//! Duplicate OP_RETURNs are permitted on chain, so the commitment stays
//! idempotent in effect.

use async_trait::async_trait;
use rand::Rng;
use secp256k1::SecretKey;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::script::claim_script;
use super::tx::{ClaimTx, Utxo};
use crate::config;

// ---------------------------------------------------------------------------
// Errors & outcomes
// ---------------------------------------------------------------------------

/// Failures surfaced by the providers.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// Transport-level failure (timeout, connection refused, bad JSON).
    /// Always retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The broadcast endpoint rejected the transaction. The message text
    /// is classified into an action.
    #[error("broadcast rejected: {0}")]
    Rejected(String),
}

/// What the retry wrapper should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimAction {
    /// Transient contention; back off and try again.
    Retry,
    /// Terminal for this block, keep mining and claiming future blocks.
    Done,
    /// Terminal for all future claims (e.g. the token is minted out).
    Stop,
}

/// Result of a claim attempt (or of the whole retry loop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub success: bool,
    pub txid: Option<String>,
    pub action: ClaimAction,
}

impl ClaimOutcome {
    fn retry() -> Self {
        Self {
            success: false,
            txid: None,
            action: ClaimAction::Retry,
        }
    }
}

/// Sort a broadcast rejection into an action by substring, case
/// insensitive. The contention class is exactly the set of messages the
/// settlement endpoints emit when a funding output was spent under us.
pub fn classify_rejection(message: &str) -> ClaimAction {
    const CONTENTION: [&str; 4] = [
        "utxo_spent",
        "txn-mempool-conflict",
        "missing inputs",
        "double spend",
    ];
    const EXHAUSTED: [&str; 2] = ["mint complete", "supply exhausted"];

    let lower = message.to_lowercase();
    if CONTENTION.iter().any(|s| lower.contains(s)) {
        return ClaimAction::Retry;
    }
    if EXHAUSTED.iter().any(|s| lower.contains(s)) {
        return ClaimAction::Stop;
    }
    ClaimAction::Done
}

// ---------------------------------------------------------------------------
// Provider traits
// ---------------------------------------------------------------------------

/// Source of spendable outputs for the funding address.
#[async_trait]
pub trait UtxoProvider: Send + Sync {
    async fn fetch_utxos(&self, address: &str) -> Result<Vec<Utxo>, ClaimError>;
}

/// Sink for raw transactions. Returns the txid on acceptance.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, ClaimError>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Retry and fee knobs. Defaults come from the protocol constants.
#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Token whose supply the commitments mint against.
    pub token_id: String,
    /// Miner address written into the commitment.
    pub miner_address: String,
    /// Address funding the claim transactions.
    pub funding_address: String,
    /// Satoshis per 1000 bytes.
    pub fee_per_kb: u64,
    /// Uniform random backoff bounds between retries.
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Additional attempts after the first.
    pub max_retries: u32,
}

impl ClaimConfig {
    pub fn new(token_id: String, miner_address: String, funding_address: String) -> Self {
        Self {
            token_id,
            miner_address,
            funding_address,
            fee_per_kb: config::CLAIM_FEE_PER_KB,
            min_backoff: config::CLAIM_MIN_BACKOFF,
            max_backoff: config::CLAIM_MAX_BACKOFF,
            max_retries: config::CLAIM_MAX_RETRIES,
        }
    }
}

// ---------------------------------------------------------------------------
// ClaimPipeline
// ---------------------------------------------------------------------------

/// The claim pipeline. One instance per node, shared with the block-found
/// handler.
pub struct ClaimPipeline<U, B> {
    config: ClaimConfig,
    funding_key: SecretKey,
    utxos: U,
    broadcaster: B,
}

impl<U: UtxoProvider, B: Broadcaster> ClaimPipeline<U, B> {
    pub fn new(config: ClaimConfig, funding_key: SecretKey, utxos: U, broadcaster: B) -> Self {
        Self {
            config,
            funding_key,
            utxos,
            broadcaster,
        }
    }

    /// One attempt: fetch, build, sign, broadcast, classify.
    pub async fn claim_once(&self, merkle_root: &str) -> ClaimOutcome {
        let utxos = match self.utxos.fetch_utxos(&self.config.funding_address).await {
            Ok(u) => u,
            Err(e) => {
                debug!(target: "claim", error = %e, "utxo fetch failed");
                return ClaimOutcome::retry();
            }
        };
        if utxos.is_empty() {
            debug!(target: "claim", "no utxos available, will retry");
            return ClaimOutcome::retry();
        }

        let script = claim_script(
            &self.config.token_id,
            merkle_root,
            &self.config.miner_address,
        );

        let mut tx = match ClaimTx::build(
            &utxos,
            script,
            &self.config.funding_address,
            self.config.fee_per_kb,
        ) {
            Ok(tx) => tx,
            Err(e) => {
                // Unspendable inputs behave like an empty set: refetch.
                debug!(target: "claim", error = %e, "claim tx build failed");
                return ClaimOutcome::retry();
            }
        };

        let raw_hex = match tx.sign_and_serialize(&self.funding_key) {
            Ok(hex) => hex,
            Err(e) => {
                warn!(target: "claim", error = %e, "signing failed");
                return ClaimOutcome {
                    success: false,
                    txid: None,
                    action: ClaimAction::Done,
                };
            }
        };

        match self.broadcaster.broadcast(&raw_hex).await {
            Ok(txid) => {
                info!(target: "claim", %txid, merkle_root, "claim broadcast accepted");
                ClaimOutcome {
                    success: true,
                    txid: Some(txid),
                    action: ClaimAction::Done,
                }
            }
            Err(ClaimError::Rejected(message)) => {
                let action = classify_rejection(&message);
                debug!(target: "claim", %message, ?action, "claim rejected");
                ClaimOutcome {
                    success: false,
                    txid: None,
                    action,
                }
            }
            Err(ClaimError::Network(message)) => {
                debug!(target: "claim", %message, "broadcast network error");
                ClaimOutcome::retry()
            }
        }
    }

    /// The retry wrapper: attempts until success, `Stop`, or exhaustion
    /// of `1 + max_retries` attempts. Between retries sleeps a uniform
    /// random delay in `[min_backoff, max_backoff]`.
    pub async fn claim_with_retry(&self, merkle_root: &str) -> ClaimOutcome {
        let attempts = 1 + self.config.max_retries;

        for attempt in 1..=attempts {
            let outcome = self.claim_once(merkle_root).await;
            match outcome.action {
                ClaimAction::Done | ClaimAction::Stop => return outcome,
                ClaimAction::Retry => {
                    if attempt == attempts {
                        break;
                    }
                    let delay = random_backoff(self.config.min_backoff, self.config.max_backoff);
                    debug!(
                        target: "claim",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        warn!(target: "claim", merkle_root, "claim retries exhausted");
        ClaimOutcome {
            success: false,
            txid: None,
            action: ClaimAction::Done,
        }
    }
}

fn random_backoff(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    let jitter = rand::thread_rng().gen_range(0..=span);
    min + Duration::from_millis(jitter)
}

// ---------------------------------------------------------------------------
// HTTP implementations
// ---------------------------------------------------------------------------

/// UTXO provider over a WhatsOnChain-style REST endpoint:
/// `GET {base}/address/{address}/unspent`.
pub struct HttpUtxoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUtxoProvider {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config::CLAIM_HTTP_TIMEOUT)
            .build()
            .expect("reqwest client construction is infallible with static config");
        Self { client, base_url }
    }
}

/// Wire shape of one unspent output from the REST endpoint.
#[derive(serde::Deserialize)]
struct WireUtxo {
    tx_hash: String,
    tx_pos: u32,
    value: u64,
}

#[async_trait]
impl UtxoProvider for HttpUtxoProvider {
    async fn fetch_utxos(&self, address: &str) -> Result<Vec<Utxo>, ClaimError> {
        let url = format!(
            "{}/address/{}/unspent",
            self.base_url.trim_end_matches('/'),
            address
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClaimError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClaimError::Network(format!(
                "utxo endpoint returned {}",
                response.status()
            )));
        }
        let wire: Vec<WireUtxo> = response
            .json()
            .await
            .map_err(|e| ClaimError::Network(e.to_string()))?;
        Ok(wire
            .into_iter()
            .map(|w| Utxo {
                txid: w.tx_hash,
                vout: w.tx_pos,
                satoshis: w.value,
            })
            .collect())
    }
}

/// Broadcaster over an ARC-style endpoint: `POST {base}/v1/tx` with the
/// raw hex. A non-2xx response body is the rejection message fed to the
/// classifier.
pub struct ArcBroadcaster {
    client: reqwest::Client,
    base_url: String,
}

impl ArcBroadcaster {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config::CLAIM_HTTP_TIMEOUT)
            .build()
            .expect("reqwest client construction is infallible with static config");
        Self { client, base_url }
    }
}

#[derive(serde::Serialize)]
struct ArcSubmit<'a> {
    #[serde(rename = "rawTx")]
    raw_tx: &'a str,
}

#[derive(serde::Deserialize)]
struct ArcResponse {
    txid: String,
}

#[async_trait]
impl Broadcaster for ArcBroadcaster {
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, ClaimError> {
        let url = format!("{}/v1/tx", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&ArcSubmit { raw_tx: raw_tx_hex })
            .send()
            .await
            .map_err(|e| ClaimError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: ArcResponse = response
                .json()
                .await
                .map_err(|e| ClaimError::Network(e.to_string()))?;
            Ok(body.txid)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClaimError::Rejected(body))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn test_address() -> String {
        let mut payload = vec![0u8];
        payload.extend_from_slice(&[0x11; 20]);
        bs58::encode(payload).with_check().into_string()
    }

    fn test_config() -> ClaimConfig {
        ClaimConfig {
            token_id: "tok".to_string(),
            miner_address: "1Miner".to_string(),
            funding_address: test_address(),
            fee_per_kb: 1,
            min_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(5),
            max_retries: 3,
        }
    }

    fn funding_key() -> SecretKey {
        SecretKey::from_slice(&[0x42; 32]).unwrap()
    }

    struct FixedUtxos(Vec<Utxo>);

    #[async_trait]
    impl UtxoProvider for FixedUtxos {
        async fn fetch_utxos(&self, _address: &str) -> Result<Vec<Utxo>, ClaimError> {
            Ok(self.0.clone())
        }
    }

    /// Broadcaster scripted with a sequence of responses; repeats the
    /// last one when the script runs out.
    struct ScriptedBroadcaster {
        responses: Mutex<Vec<Result<String, ClaimError>>>,
        calls: AtomicU32,
    }

    impl ScriptedBroadcaster {
        fn new(responses: Vec<Result<String, ClaimError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Broadcaster for Arc<ScriptedBroadcaster> {
        async fn broadcast(&self, _raw_tx_hex: &str) -> Result<String, ClaimError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                match &responses[0] {
                    Ok(txid) => Ok(txid.clone()),
                    Err(ClaimError::Rejected(m)) => Err(ClaimError::Rejected(m.clone())),
                    Err(ClaimError::Network(m)) => Err(ClaimError::Network(m.clone())),
                }
            }
        }
    }

    fn utxos() -> Vec<Utxo> {
        vec![Utxo {
            txid: "aa".repeat(32),
            vout: 0,
            satoshis: 50_000,
        }]
    }

    // -- 1. Classification ---------------------------------------------------

    #[test]
    fn contention_substrings_mean_retry() {
        assert_eq!(classify_rejection("txn-mempool-conflict"), ClaimAction::Retry);
        assert_eq!(classify_rejection("error: UTXO_SPENT by peer"), ClaimAction::Retry);
        assert_eq!(classify_rejection("Missing Inputs"), ClaimAction::Retry);
        assert_eq!(classify_rejection("possible double spend"), ClaimAction::Retry);
    }

    #[test]
    fn other_rejections_mean_done() {
        assert_eq!(classify_rejection("insufficient fee"), ClaimAction::Done);
        assert_eq!(classify_rejection("script verification failed"), ClaimAction::Done);
        assert_eq!(classify_rejection(""), ClaimAction::Done);
    }

    #[test]
    fn exhaustion_means_stop() {
        assert_eq!(classify_rejection("token supply exhausted"), ClaimAction::Stop);
        assert_eq!(classify_rejection("MINT COMPLETE"), ClaimAction::Stop);
    }

    // -- 2. Single attempts --------------------------------------------------

    #[tokio::test]
    async fn successful_claim_returns_txid() {
        let broadcaster = ScriptedBroadcaster::new(vec![Ok("txid123".to_string())]);
        let pipeline = ClaimPipeline::new(
            test_config(),
            funding_key(),
            FixedUtxos(utxos()),
            Arc::clone(&broadcaster),
        );

        let outcome = pipeline.claim_once(&"ab".repeat(32)).await;
        assert!(outcome.success);
        assert_eq!(outcome.txid.as_deref(), Some("txid123"));
        assert_eq!(outcome.action, ClaimAction::Done);
    }

    #[tokio::test]
    async fn empty_utxo_set_requests_retry() {
        let broadcaster = ScriptedBroadcaster::new(vec![Ok("unused".to_string())]);
        let pipeline = ClaimPipeline::new(
            test_config(),
            funding_key(),
            FixedUtxos(vec![]),
            Arc::clone(&broadcaster),
        );

        let outcome = pipeline.claim_once(&"ab".repeat(32)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.action, ClaimAction::Retry);
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 0);
    }

    struct FailingUtxos;

    #[async_trait]
    impl UtxoProvider for FailingUtxos {
        async fn fetch_utxos(&self, _address: &str) -> Result<Vec<Utxo>, ClaimError> {
            Err(ClaimError::Network("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn utxo_fetch_failure_requests_retry() {
        let broadcaster = ScriptedBroadcaster::new(vec![Ok("unused".to_string())]);
        let pipeline = ClaimPipeline::new(
            test_config(),
            funding_key(),
            FailingUtxos,
            Arc::clone(&broadcaster),
        );
        let outcome = pipeline.claim_once(&"ab".repeat(32)).await;
        assert_eq!(outcome.action, ClaimAction::Retry);
    }

    // -- 3. Retry wrapper ----------------------------------------------------

    #[tokio::test]
    async fn retries_through_contention_to_success() {
        let broadcaster = ScriptedBroadcaster::new(vec![
            Err(ClaimError::Rejected("txn-mempool-conflict".to_string())),
            Err(ClaimError::Rejected("utxo_spent".to_string())),
            Ok("txid-after-retries".to_string()),
        ]);
        let pipeline = ClaimPipeline::new(
            test_config(),
            funding_key(),
            FixedUtxos(utxos()),
            Arc::clone(&broadcaster),
        );

        let outcome = pipeline.claim_with_retry(&"ab".repeat(32)).await;
        assert!(outcome.success);
        assert_eq!(outcome.txid.as_deref(), Some("txid-after-retries"));
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_done_without_success() {
        let broadcaster = ScriptedBroadcaster::new(vec![Err(ClaimError::Rejected(
            "txn-mempool-conflict".to_string(),
        ))]);
        let pipeline = ClaimPipeline::new(
            test_config(),
            funding_key(),
            FixedUtxos(utxos()),
            Arc::clone(&broadcaster),
        );

        let outcome = pipeline.claim_with_retry(&"ab".repeat(32)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.action, ClaimAction::Done);
        // 1 initial + max_retries additional attempts.
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stop_short_circuits_retries() {
        let broadcaster = ScriptedBroadcaster::new(vec![Err(ClaimError::Rejected(
            "token supply exhausted".to_string(),
        ))]);
        let pipeline = ClaimPipeline::new(
            test_config(),
            funding_key(),
            FixedUtxos(utxos()),
            Arc::clone(&broadcaster),
        );

        let outcome = pipeline.claim_with_retry(&"ab".repeat(32)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.action, ClaimAction::Stop);
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn terminal_rejection_does_not_retry() {
        let broadcaster = ScriptedBroadcaster::new(vec![Err(ClaimError::Rejected(
            "insufficient fee".to_string(),
        ))]);
        let pipeline = ClaimPipeline::new(
            test_config(),
            funding_key(),
            FixedUtxos(utxos()),
            Arc::clone(&broadcaster),
        );

        let outcome = pipeline.claim_with_retry(&"ab".repeat(32)).await;
        assert_eq!(outcome.action, ClaimAction::Done);
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn network_errors_are_retried() {
        let broadcaster = ScriptedBroadcaster::new(vec![
            Err(ClaimError::Network("timeout".to_string())),
            Ok("txid-net".to_string()),
        ]);
        let pipeline = ClaimPipeline::new(
            test_config(),
            funding_key(),
            FixedUtxos(utxos()),
            Arc::clone(&broadcaster),
        );

        let outcome = pipeline.claim_with_retry(&"ab".repeat(32)).await;
        assert!(outcome.success);
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 2);
    }

    // -- 4. Backoff ----------------------------------------------------------

    #[test]
    fn backoff_stays_in_bounds() {
        let min = Duration::from_millis(200);
        let max = Duration::from_millis(500);
        for _ in 0..50 {
            let d = random_backoff(min, max);
            assert!(d >= min && d <= max);
        }
        assert_eq!(random_backoff(max, min), max); // degenerate bounds
    }
}
