//! # Work Items
//!
//! The unit of mineable activity. Anything a node does for the network
//! (validating a transfer, serving paid content, relaying a transaction,
//! or just proving it is alive) is recorded as a work item and queued
//! for inclusion in the next PoI block.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of activity a work item records. Wire form is lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkKind {
    /// A transfer or stamp was observed and validated.
    Validation,
    /// Paid content was served to a requester.
    Serve,
    /// A raw transaction was relayed on request.
    Relay,
    /// Keep-alive work injected when the mempool runs dry.
    Heartbeat,
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Serve => "serve",
            Self::Relay => "relay",
            Self::Heartbeat => "heartbeat",
        };
        f.write_str(s)
    }
}

/// One unit of work awaiting block inclusion. The `id` is the uniqueness
/// key everywhere: mempool dedup, block membership, and the Merkle leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identifier, unique per unit of work.
    pub id: String,
    /// Activity class.
    #[serde(rename = "type")]
    pub kind: WorkKind,
    /// Opaque context for the activity (txid, content id, ...). The miner
    /// never interprets it.
    pub data: serde_json::Value,
    /// Milliseconds since epoch when the work was submitted.
    pub timestamp: u64,
}

impl WorkItem {
    /// Build a work item with a fresh random id and the current time.
    pub fn new(kind: WorkKind, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            kind,
            data,
            timestamp: crate::util::unix_millis(),
        }
    }
}
