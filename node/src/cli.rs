//! # CLI Interface
//!
//! Defines the command-line argument structure for `p402-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// P402 network node.
///
/// A full participant in the P402 network: joins the gossip overlay,
/// mines Proof-of-Indexing blocks from observed work, adjusts difficulty
/// with the rest of the network, and anchors mined blocks on the
/// settlement chain.
#[derive(Parser, Debug)]
#[command(
    name = "p402-node",
    about = "P402 network node",
    version,
    propagate_version = true
)]
pub struct P402NodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a new node: creates the data directory and generates
    /// a fresh identity keypair.
    Init(InitArgs),
    /// Query the health endpoint of a running node.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node data directory where blocks and keys are stored.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "P402_DATA_DIR", default_value = "~/.p402")]
    pub data_dir: PathBuf,

    /// TCP port for the gossip transport.
    #[arg(long, env = "P402_GOSSIP_PORT", default_value_t = 4020)]
    pub gossip_port: u16,

    /// Port for the HTTP health endpoint.
    #[arg(long, env = "P402_RPC_PORT", default_value_t = 4021)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "P402_METRICS_PORT", default_value_t = 4022)]
    pub metrics_port: u16,

    /// Bootstrap peers as full multiaddrs (with embedded peer ids).
    /// Repeatable.
    #[arg(long = "bootstrap", env = "P402_BOOTSTRAP", value_delimiter = ',')]
    pub bootstrap: Vec<String>,

    /// Settlement-chain address credited in mined block headers.
    /// Mining runs without it using a placeholder; claiming does not.
    #[arg(long, env = "P402_MINER_ADDRESS")]
    pub miner_address: Option<String>,

    /// Token id committed in claim transactions.
    #[arg(long, env = "P402_TOKEN_ID")]
    pub token_id: Option<String>,

    /// Hex-encoded secp256k1 key funding claim transactions.
    ///
    /// **Never pass this flag on a shared machine's command line**; use
    /// the environment variable.
    #[arg(long, env = "P402_FUNDING_KEY", hide_env_values = true)]
    pub funding_key: Option<String>,

    /// Base58check address holding the funding UTXOs. Must correspond to
    /// the funding key.
    #[arg(long, env = "P402_FUNDING_ADDRESS")]
    pub funding_address: Option<String>,

    /// Base URL of the UTXO lookup service.
    #[arg(long, env = "P402_UTXO_URL")]
    pub utxo_url: Option<String>,

    /// Base URL of the transaction broadcast (ARC) service.
    #[arg(long, env = "P402_ARC_URL")]
    pub arc_url: Option<String>,

    /// Disable the miner entirely (gossip-only node).
    #[arg(long, default_value_t = false)]
    pub no_mine: bool,

    /// Use a fresh throwaway identity instead of the persisted key.
    /// Stale discovery records pointing at the old identity are expected
    /// and tolerated.
    #[arg(long, default_value_t = false)]
    pub ephemeral: bool,

    /// Default log level when RUST_LOG is not set.
    #[arg(long, env = "P402_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "P402_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "P402_DATA_DIR", default_value = "~/.p402")]
    pub data_dir: PathBuf,

    /// Overwrite an existing identity key.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running node's HTTP endpoint.
    #[arg(long, default_value = "http://127.0.0.1:4021")]
    pub rpc_url: String,
}

/// Expand a leading `~` to the user's home directory.
pub fn resolve_data_dir(path: &std::path::Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if let Some(rest) = raw.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut resolved = PathBuf::from(home);
            resolved.push(rest.trim_start_matches('/'));
            return resolved;
        }
    }
    path.to_path_buf()
}

/// Accepted log level names.
pub fn validate_log_level(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}
