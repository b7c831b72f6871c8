// Copyright (c) 2026 P402 Contributors. MIT License.
// See LICENSE for details.

//! # P402 Node
//!
//! Entry point for the `p402-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the gossip overlay to the
//! miner and the claim pipeline, and serves the HTTP health probe.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — start the node
//! - `init`    — initialize the data directory and generate the identity
//! - `status`  — query a running node's health endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use primitive_types::U256;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use p402_protocol::codec::payload::{
    BlockAnnounce, ContentRequest, Hello, Ping, TicketStamp, TransferEvent,
};
use p402_protocol::codec::{Envelope, MessageType};
use p402_protocol::config as protocol_config;
use p402_protocol::crypto::NodeKeypair;
use p402_protocol::mining::{
    miner::heartbeat_loop, DifficultyAdjuster, Mempool, Miner, MinerConfig, WorkItem, WorkKind,
};
use p402_protocol::network::{Dispatcher, GossipHandle, GossipNode, NodeConfig, PeerTable};
use p402_protocol::settlement::{
    ArcBroadcaster, ClaimAction, ClaimConfig, ClaimPipeline, HttpUtxoProvider,
};
use p402_protocol::storage::{Block, BlockStore};
use p402_protocol::util::unix_millis;

use cli::{Commands, P402NodeCli};
use logging::LogFormat;
use metrics::{NodeMetrics, SharedMetrics};

/// Capacity of the solved-block handoff channel.
const FOUND_BLOCK_CHANNEL_CAPACITY: usize = 16;

/// Cadence of the gauge refresh task.
const GAUGE_REFRESH: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = P402NodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — full node startup sequence
// ---------------------------------------------------------------------------

/// Startup sequence:
/// 1.  Initialize logging
/// 2.  Load or generate the identity keypair
/// 3.  Open the block store
/// 4.  Restore the difficulty adjuster
/// 5.  Create the mempool and dispatcher
/// 6.  Build the gossip node
/// 7.  Register message observers
/// 8.  Configure the claim pipeline (optional)
/// 9.  Spawn gossip, miner, heartbeat, claim, and gauge tasks
/// 10. Serve /health and /metrics
/// 11. Await shutdown and trip the cancellation token
async fn run_node(args: cli::RunArgs) -> Result<()> {
    // --- 1. Logging ---
    if !cli::validate_log_level(&args.log_level) {
        bail!("unknown log level: {}", args.log_level);
    }
    let filter = format!(
        "p402_node={level},p402_protocol={level},gossip={level},mining={level},difficulty={level},claim={level}",
        level = args.log_level
    );
    logging::init_logging(&filter, LogFormat::from_str_lossy(&args.log_format));

    let data_dir = cli::resolve_data_dir(&args.data_dir);
    info!(
        data_dir = %data_dir.display(),
        gossip_port = args.gossip_port,
        rpc_port = args.rpc_port,
        "starting p402-node"
    );

    // --- 2. Identity ---
    let keypair = if args.ephemeral {
        let kp = NodeKeypair::generate();
        info!(sender_id = %kp.sender_id(), "generated ephemeral identity");
        kp
    } else {
        load_or_generate_keypair(&data_dir)?
    };
    let keypair = Arc::new(keypair);
    let sender_id = keypair.sender_id();

    // --- 3. Block store ---
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory {}", db_path.display()))?;
    let store = Arc::new(
        BlockStore::open(&db_path)
            .with_context(|| format!("failed to open block store at {}", db_path.display()))?,
    );
    info!(blocks = store.count().unwrap_or(0), "block store opened");

    // --- 4. Difficulty adjuster ---
    let adjuster = Arc::new(DifficultyAdjuster::default());
    restore_difficulty(&store, &adjuster)?;

    // --- 5. Mempool & dispatcher ---
    let mempool = Arc::new(Mempool::new());
    let dispatcher = Arc::new(Dispatcher::new());
    let peers = Arc::new(PeerTable::new());
    let node_metrics: SharedMetrics = Arc::new(NodeMetrics::new());
    let last_sync_at = Arc::new(AtomicU64::new(0));

    // --- 6. Gossip node ---
    let bootstrap = parse_bootstrap(&args.bootstrap)?;
    let (gossip_node, gossip_handle, _router) = GossipNode::new(
        keypair.libp2p_keypair(),
        NodeConfig {
            listen_port: args.gossip_port,
            bootstrap,
            max_connections: protocol_config::MAX_CONNECTIONS as usize,
        },
        Arc::clone(&peers),
        Arc::clone(&dispatcher),
    )
    .context("failed to build gossip node")?;

    // --- 7. Observers ---
    register_observers(ObserverDeps {
        dispatcher: Arc::clone(&dispatcher),
        store: Arc::clone(&store),
        adjuster: Arc::clone(&adjuster),
        mempool: Arc::clone(&mempool),
        metrics: Arc::clone(&node_metrics),
        last_sync_at: Arc::clone(&last_sync_at),
        gossip: gossip_handle.clone(),
        keypair: Arc::clone(&keypair),
    })?;

    // --- 8. Claim pipeline ---
    let claim = build_claim_pipeline(&args)?;
    if claim.is_none() {
        warn!(target: "claim", "claim settings absent; mined blocks will not be anchored");
    }

    // --- 9. Long-lived tasks ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (found_tx, found_rx) = mpsc::channel::<Block>(FOUND_BLOCK_CHANNEL_CAPACITY);

    let gossip_task = tokio::spawn(gossip_node.run(shutdown_rx.clone()));

    let miner_task = if args.no_mine {
        info!(target: "mining", "miner disabled by --no-mine");
        None
    } else {
        let miner_address = match &args.miner_address {
            Some(addr) => addr.clone(),
            None => bail!("mining is enabled but --miner-address is missing (or pass --no-mine)"),
        };
        let miner = Arc::new(Miner::new(
            MinerConfig {
                miner_address,
                ..MinerConfig::default()
            },
            Arc::clone(&mempool),
            Arc::clone(&store),
            Some(Arc::clone(&adjuster)),
            found_tx,
        ));
        let miner_ref = Arc::clone(&miner);
        let rx = shutdown_rx.clone();
        let handle = tokio::spawn(async move { miner_ref.run(rx).await });

        tokio::spawn(heartbeat_loop(
            Arc::clone(&mempool),
            protocol_config::MINER_MIN_ITEMS,
            shutdown_rx.clone(),
        ));
        Some(handle)
    };

    spawn_block_found_consumer(
        found_rx,
        Arc::clone(&keypair),
        gossip_handle.clone(),
        Arc::clone(&store),
        claim,
        Arc::clone(&node_metrics),
    );

    spawn_gauge_refresher(
        shutdown_rx.clone(),
        Arc::clone(&node_metrics),
        Arc::clone(&mempool),
        Arc::clone(&peers),
        Arc::clone(&store),
        Arc::clone(&adjuster),
    );

    // --- 10. HTTP surfaces ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            protocol_config::PROTOCOL_VERSION
        ),
        started_at: Instant::now(),
        last_sync_at: Arc::clone(&last_sync_at),
    };

    let api_router = api::create_router(app_state);
    let api_listener = tokio::net::TcpListener::bind(("0.0.0.0", args.rpc_port))
        .await
        .with_context(|| format!("failed to bind health listener on port {}", args.rpc_port))?;
    info!("health endpoint listening on 0.0.0.0:{}", args.rpc_port);

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_listener = tokio::net::TcpListener::bind(("0.0.0.0", args.metrics_port))
        .await
        .with_context(|| {
            format!("failed to bind metrics listener on port {}", args.metrics_port)
        })?;
    info!("metrics listening on 0.0.0.0:{}", args.metrics_port);

    info!(
        sender_id = %sender_id,
        peer_id = %gossip_handle.local_peer(),
        mining = !args.no_mine,
        "p402-node up"
    );

    // --- 11. Await shutdown ---
    tokio::select! {
        result = axum::serve(api_listener, api_router) => {
            if let Err(e) = result {
                warn!("health server error: {e}");
            }
        }
        result = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = result {
                warn!("metrics server error: {e}");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = miner_task {
        let _ = handle.await;
    }
    let _ = gossip_task.await;

    info!("p402-node stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Everything the observer set needs a handle on.
struct ObserverDeps {
    dispatcher: Arc<Dispatcher>,
    store: Arc<BlockStore>,
    adjuster: Arc<DifficultyAdjuster>,
    mempool: Arc<Mempool>,
    metrics: SharedMetrics,
    last_sync_at: Arc<AtomicU64>,
    gossip: GossipHandle,
    keypair: Arc<NodeKeypair>,
}

/// Register the node's message observers, one per type, at startup.
/// Observers run on the delivery task and must return quickly; anything
/// slow is pushed into the mempool or a spawned task.
fn register_observers(deps: ObserverDeps) -> Result<()> {
    // BLOCK_ANNOUNCE: verify, persist as remote, feed the retarget.
    {
        let store = Arc::clone(&deps.store);
        let adjuster = Arc::clone(&deps.adjuster);
        let metrics = Arc::clone(&deps.metrics);
        let last_sync_at = Arc::clone(&deps.last_sync_at);
        deps.dispatcher
            .register(MessageType::BlockAnnounce, move |envelope, peer| {
                metrics.messages_received_total.inc();
                let announce: BlockAnnounce = match envelope.payload_as() {
                    Ok(a) => a,
                    Err(e) => {
                        debug!(target: "gossip", peer, error = %e, "bad block announce payload");
                        return;
                    }
                };
                let block = announce.block;
                if let Err(reason) = block.verify() {
                    debug!(target: "gossip", peer, %reason, "announced block failed verification");
                    return;
                }
                match store.insert(&block, false) {
                    Ok(()) => {
                        adjuster.record_block(block.header.timestamp);
                        let _ = store.set_target_hex(&adjuster.target_hex());
                        last_sync_at.store(unix_millis(), Ordering::Relaxed);
                        metrics.blocks_received_total.inc();
                        info!(
                            target: "gossip",
                            hash = %block.hash,
                            height = block.height,
                            peer,
                            "remote block stored"
                        );
                    }
                    Err(e) => {
                        // Duplicate hashes are routine when two topics race.
                        debug!(target: "gossip", error = %e, "block not stored");
                    }
                }
            })
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    // CONTENT_REQUEST: serving paid content is itself mineable work.
    {
        let mempool = Arc::clone(&deps.mempool);
        let metrics = Arc::clone(&deps.metrics);
        deps.dispatcher
            .register(MessageType::ContentRequest, move |envelope, peer| {
                metrics.messages_received_total.inc();
                let request: ContentRequest = match envelope.payload_as() {
                    Ok(r) => r,
                    Err(e) => {
                        debug!(target: "gossip", peer, error = %e, "bad content request payload");
                        return;
                    }
                };
                let Some(payment_txid) = request.payment_txid else {
                    return; // unpaid request, nothing to index
                };
                let item = WorkItem {
                    // Keyed by payment so a re-gossiped request is the
                    // same unit of work.
                    id: format!("serve-{payment_txid}"),
                    kind: WorkKind::Serve,
                    data: serde_json::json!({
                        "content_id": request.content_id,
                        "payment_txid": payment_txid,
                        "requester": envelope.sender_id,
                    }),
                    timestamp: unix_millis(),
                };
                mempool.add(item);
            })
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    // TRANSFER_EVENT: an observed transfer is validation work, keyed by
    // txid so the same transfer never enters the pool twice.
    {
        let mempool = Arc::clone(&deps.mempool);
        let metrics = Arc::clone(&deps.metrics);
        deps.dispatcher
            .register(MessageType::TransferEvent, move |envelope, peer| {
                metrics.messages_received_total.inc();
                let transfer: TransferEvent = match envelope.payload_as() {
                    Ok(t) => t,
                    Err(e) => {
                        debug!(target: "gossip", peer, error = %e, "bad transfer payload");
                        return;
                    }
                };
                let item = WorkItem {
                    id: format!("transfer-{}", transfer.txid),
                    kind: WorkKind::Validation,
                    data: serde_json::json!({
                        "txid": transfer.txid,
                        "token_id": transfer.token_id,
                        "amount": transfer.amount,
                    }),
                    timestamp: unix_millis(),
                };
                mempool.add(item);
            })
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    // TICKET_STAMP: stamping is validation work too.
    {
        let mempool = Arc::clone(&deps.mempool);
        let metrics = Arc::clone(&deps.metrics);
        deps.dispatcher
            .register(MessageType::TicketStamp, move |envelope, peer| {
                metrics.messages_received_total.inc();
                let stamp: TicketStamp = match envelope.payload_as() {
                    Ok(s) => s,
                    Err(e) => {
                        debug!(target: "gossip", peer, error = %e, "bad ticket stamp payload");
                        return;
                    }
                };
                let item = WorkItem {
                    id: format!("stamp-{}", stamp.ticket_id),
                    kind: WorkKind::Validation,
                    data: serde_json::json!({
                        "ticket_id": stamp.ticket_id,
                        "token_id": stamp.token_id,
                        "stamped_by": stamp.stamped_by,
                    }),
                    timestamp: unix_millis(),
                };
                mempool.add(item);
            })
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    // PING: answer with a PONG carrying the same nonce.
    {
        let gossip = deps.gossip.clone();
        let keypair = Arc::clone(&deps.keypair);
        let metrics = Arc::clone(&deps.metrics);
        deps.dispatcher
            .register(MessageType::Ping, move |envelope, _peer| {
                metrics.messages_received_total.inc();
                let Ok(ping) = envelope.payload_as::<Ping>() else {
                    return;
                };
                let pong = signed_envelope(
                    &keypair,
                    MessageType::Pong,
                    &Ping {
                        timestamp: unix_millis(),
                        nonce: ping.nonce,
                    },
                );
                let gossip = gossip.clone();
                tokio::spawn(async move {
                    let _ = gossip.publish(pong).await;
                });
            })
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    // HELLO: greeting only, worth a log line.
    {
        let metrics = Arc::clone(&deps.metrics);
        deps.dispatcher
            .register(MessageType::Hello, move |envelope, peer| {
                metrics.messages_received_total.inc();
                if let Ok(hello) = envelope.payload_as::<Hello>() {
                    info!(
                        target: "gossip",
                        peer,
                        sender = %envelope.sender_id,
                        agent = %hello.agent,
                        "peer said hello"
                    );
                }
            })
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    // Relay traffic is forwarded to observers without persistence; this
    // node keeps no raw-tx store, so observing means accounting only.
    for msg_type in [
        MessageType::TxRelay,
        MessageType::TxRequest,
        MessageType::TxResponse,
    ] {
        let metrics = Arc::clone(&deps.metrics);
        deps.dispatcher
            .register(msg_type, move |envelope, peer| {
                metrics.messages_received_total.inc();
                debug!(target: "gossip", peer, msg_type = %envelope.msg_type, "relay traffic observed");
            })
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    Ok(())
}

/// Build an envelope from this node's identity and sign its fingerprint.
fn signed_envelope<P: Serialize>(
    keypair: &NodeKeypair,
    msg_type: MessageType,
    payload: &P,
) -> Envelope {
    let mut envelope = Envelope::new(msg_type, &keypair.sender_id(), payload);
    envelope.signature = Some(keypair.sign_hex(envelope.fingerprint().as_bytes()));
    envelope
}

// ---------------------------------------------------------------------------
// Block-found consumer
// ---------------------------------------------------------------------------

type NodeClaimPipeline = ClaimPipeline<HttpUtxoProvider, ArcBroadcaster>;

/// Consume solved blocks from the miner: announce to the network, then
/// run the claim pipeline. A `Stop` outcome disables future claims while
/// mining and gossip continue.
fn spawn_block_found_consumer(
    mut found_rx: mpsc::Receiver<Block>,
    keypair: Arc<NodeKeypair>,
    gossip: GossipHandle,
    store: Arc<BlockStore>,
    claim: Option<Arc<NodeClaimPipeline>>,
    metrics: SharedMetrics,
) {
    let claims_stopped = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        while let Some(block) = found_rx.recv().await {
            metrics.blocks_mined_total.inc();
            metrics.chain_height.set(block.height as i64);

            let announce = signed_envelope(
                &keypair,
                MessageType::BlockAnnounce,
                &BlockAnnounce {
                    block: block.clone(),
                },
            );
            if let Err(e) = gossip.publish(announce).await {
                warn!(target: "gossip", error = %e, "failed to queue block announcement");
            }

            let Some(pipeline) = claim.as_ref() else {
                continue;
            };
            if claims_stopped.load(Ordering::Relaxed) {
                debug!(target: "claim", "claims stopped; skipping block");
                continue;
            }

            metrics.claim_attempts_total.inc();
            let outcome = pipeline.claim_with_retry(&block.header.merkle_root).await;
            if let Some(txid) = &outcome.txid {
                if let Err(e) = store.set_mint_txid(&block.hash, txid) {
                    warn!(target: "claim", error = %e, "failed to record mint txid");
                }
                metrics.claims_succeeded_total.inc();
            }
            if outcome.action == ClaimAction::Stop {
                warn!(target: "claim", "settlement reports mint complete; disabling future claims");
                claims_stopped.store(true, Ordering::Relaxed);
            }
        }
    });
}

/// Periodic gauge refresh from the shared structures.
fn spawn_gauge_refresher(
    mut shutdown: watch::Receiver<bool>,
    metrics: SharedMetrics,
    mempool: Arc<Mempool>,
    peers: Arc<PeerTable>,
    store: Arc<BlockStore>,
    adjuster: Arc<DifficultyAdjuster>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(GAUGE_REFRESH);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    metrics.mempool_depth.set(mempool.len() as i64);
                    metrics.connected_peers.set(peers.active_count() as i64);
                    metrics.difficulty.set(adjuster.difficulty() as i64);
                    if let Ok(Some(tip)) = store.tip() {
                        metrics.chain_height.set(tip.height as i64);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Startup helpers
// ---------------------------------------------------------------------------

/// Restore persisted difficulty state into a fresh adjuster.
fn restore_difficulty(store: &BlockStore, adjuster: &DifficultyAdjuster) -> Result<()> {
    let Some(target_hex) = store.target_hex()? else {
        return Ok(()); // fresh network start at max target
    };
    match U256::from_str_radix(&target_hex, 16) {
        Ok(target) => {
            let total = store.count()?;
            let recent = store.recent_timestamps(protocol_config::ADJUSTMENT_PERIOD)?;
            adjuster.restore(target, total, &recent);
        }
        Err(e) => {
            warn!(target: "difficulty", error = %e, "persisted target unreadable, starting fresh");
        }
    }
    Ok(())
}

/// Parse the bootstrap list into multiaddrs, failing loudly on typos;
/// a silently dropped bootstrap entry is a debugging nightmare.
fn parse_bootstrap(entries: &[String]) -> Result<Vec<libp2p::Multiaddr>> {
    entries
        .iter()
        .map(|raw| {
            raw.parse()
                .with_context(|| format!("invalid bootstrap multiaddr: {raw}"))
        })
        .collect()
}

/// Assemble the claim pipeline when the full setting set is present.
/// Partial settings are a configuration error, not a silent downgrade.
fn build_claim_pipeline(args: &cli::RunArgs) -> Result<Option<Arc<NodeClaimPipeline>>> {
    let settings = [
        args.token_id.is_some(),
        args.miner_address.is_some(),
        args.funding_key.is_some(),
        args.funding_address.is_some(),
        args.utxo_url.is_some(),
        args.arc_url.is_some(),
    ];
    let given = settings.iter().filter(|s| **s).count();
    if given == 0 || (given == 1 && args.miner_address.is_some()) {
        // Mining-only configuration; no claims.
        return Ok(None);
    }
    if settings.iter().any(|s| !s) {
        bail!(
            "incomplete claim settings: all of --token-id, --miner-address, --funding-key, \
             --funding-address, --utxo-url, --arc-url are required to anchor blocks"
        );
    }

    let key_hex = args.funding_key.as_deref().expect("checked above");
    let key_bytes = hex::decode(key_hex.trim()).context("funding key is not valid hex")?;
    let funding_key = secp256k1::SecretKey::from_slice(&key_bytes)
        .context("funding key is not a valid secp256k1 scalar")?;

    let config = ClaimConfig::new(
        args.token_id.clone().expect("checked above"),
        args.miner_address.clone().expect("checked above"),
        args.funding_address.clone().expect("checked above"),
    );
    let pipeline = ClaimPipeline::new(
        config,
        funding_key,
        HttpUtxoProvider::new(args.utxo_url.clone().expect("checked above")),
        ArcBroadcaster::new(args.arc_url.clone().expect("checked above")),
    );
    Ok(Some(Arc::new(pipeline)))
}

/// Load the identity from `{data_dir}/keys/node.key`, or generate and
/// persist a new one. The key file is hex, owner-readable only.
fn load_or_generate_keypair(data_dir: &std::path::Path) -> Result<NodeKeypair> {
    let keys_dir = data_dir.join("keys");
    let key_path = keys_dir.join("node.key");

    if key_path.exists() {
        let hex_str = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read identity key {}", key_path.display()))?;
        let keypair = NodeKeypair::from_hex(hex_str.trim())
            .map_err(|e| anyhow::anyhow!("invalid identity key: {e}"))?;
        info!(sender_id = %keypair.sender_id(), "loaded identity from disk");
        return Ok(keypair);
    }

    std::fs::create_dir_all(&keys_dir)
        .with_context(|| format!("failed to create keys directory {}", keys_dir.display()))?;
    let keypair = NodeKeypair::generate();
    std::fs::write(&key_path, hex::encode(keypair.secret_key_bytes()))
        .with_context(|| format!("failed to write identity key {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    info!(sender_id = %keypair.sender_id(), "generated and saved new identity");
    Ok(keypair)
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

/// Create the data directory layout and the identity keypair.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("p402_node=info", LogFormat::Pretty);

    let data_dir = cli::resolve_data_dir(&args.data_dir);
    let key_path = data_dir.join("keys").join("node.key");
    if key_path.exists() && !args.force {
        bail!(
            "data directory already initialized at {}. Use --force to overwrite.",
            data_dir.display()
        );
    }

    let db_dir = data_dir.join("db");
    let keys_dir = data_dir.join("keys");
    std::fs::create_dir_all(&db_dir)
        .with_context(|| format!("failed to create {}", db_dir.display()))?;
    std::fs::create_dir_all(&keys_dir)
        .with_context(|| format!("failed to create {}", keys_dir.display()))?;

    let keypair = NodeKeypair::generate();
    std::fs::write(&key_path, hex::encode(keypair.secret_key_bytes()))
        .with_context(|| format!("failed to write {}", key_path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let peer_id = libp2p::PeerId::from(keypair.libp2p_keypair().public());

    println!();
    println!("Node initialized successfully.");
    println!();
    println!("  Data directory : {}", data_dir.display());
    println!("  Identity key   : {}", key_path.display());
    println!("  Sender id      : {}", keypair.sender_id());
    println!("  Peer id        : {}", peer_id);
    println!();
    println!("Run `p402-node run -d {}` to start the node.", data_dir.display());

    Ok(())
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

/// Query a running node's `/health` and pretty-print the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/health", args.rpc_url.trim_end_matches('/'));
    let body: serde_json::Value = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?
        .json()
        .await
        .context("health endpoint returned non-JSON")?;

    println!("Node Health");
    if let Some(status) = body.get("status").and_then(|v| v.as_str()) {
        println!("  Status         : {status}");
    }
    if let Some(version) = body.get("version").and_then(|v| v.as_str()) {
        println!("  Version        : {version}");
    }
    if let Some(uptime) = body.get("uptime_seconds").and_then(|v| v.as_u64()) {
        println!("  Uptime         : {uptime}s");
    }
    if let Some(supply) = body.get("circulating_supply").and_then(|v| v.as_u64()) {
        println!("  Supply         : {supply}");
    }
    if let Some(holders) = body.get("holder_count").and_then(|v| v.as_u64()) {
        println!("  Holders        : {holders}");
    }
    if let Some(sync) = body.get("last_sync_at").and_then(|v| v.as_u64()) {
        let rendered = if sync == 0 {
            "never".to_string()
        } else {
            chrono::DateTime::from_timestamp_millis(sync as i64)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| sync.to_string())
        };
        println!("  Last sync      : {rendered}");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

fn print_version() {
    println!("p402-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", protocol_config::PROTOCOL_VERSION);
    if let Some(commit) = option_env!("GIT_COMMIT") {
        println!("commit    {commit}");
    }
}

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
