//! # Message Types & Payloads
//!
//! The closed set of gossip message types, the type→topic routing table,
//! and the typed payload structs the application layer exchanges.
//!
//! Message types are a Rust enum, not strings. An unknown `type` tag on
//! the wire fails envelope parsing and is accounted against the sending
//! peer; there is no "unknown message" passthrough.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config;
use crate::storage::Block;

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Every message type the overlay routes. The wire form is
/// SCREAMING_SNAKE_CASE (`ANNOUNCE_TOKEN`, `BLOCK_ANNOUNCE`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    AnnounceToken,
    RequestToken,
    TokenData,
    Hello,
    Ping,
    Pong,
    TransferEvent,
    HolderUpdate,
    TicketStamp,
    ChatMessage,
    ContentRequest,
    ContentOffer,
    BlockAnnounce,
    TxRelay,
    TxRequest,
    TxResponse,
}

impl MessageType {
    /// The gossip topic this type is published to and expected from.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::AnnounceToken
            | Self::RequestToken
            | Self::TokenData
            | Self::Hello
            | Self::Ping
            | Self::Pong => config::TOPIC_TOKENS,
            Self::TransferEvent | Self::HolderUpdate => config::TOPIC_TRANSFERS,
            Self::TicketStamp => config::TOPIC_STAMPS,
            Self::ChatMessage => config::TOPIC_CHAT,
            Self::ContentRequest | Self::ContentOffer => config::TOPIC_CONTENT,
            Self::BlockAnnounce => config::TOPIC_BLOCKS,
            Self::TxRelay | Self::TxRequest | Self::TxResponse => config::TOPIC_RELAY,
        }
    }

    /// Wire tag, e.g. `BLOCK_ANNOUNCE`. Used verbatim in fingerprints.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnnounceToken => "ANNOUNCE_TOKEN",
            Self::RequestToken => "REQUEST_TOKEN",
            Self::TokenData => "TOKEN_DATA",
            Self::Hello => "HELLO",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::TransferEvent => "TRANSFER_EVENT",
            Self::HolderUpdate => "HOLDER_UPDATE",
            Self::TicketStamp => "TICKET_STAMP",
            Self::ChatMessage => "CHAT_MESSAGE",
            Self::ContentRequest => "CONTENT_REQUEST",
            Self::ContentOffer => "CONTENT_OFFER",
            Self::BlockAnnounce => "BLOCK_ANNOUNCE",
            Self::TxRelay => "TX_RELAY",
            Self::TxRequest => "TX_REQUEST",
            Self::TxResponse => "TX_RESPONSE",
        }
    }

    /// All types, in topic-table order. Handy for registering observers
    /// and for exhaustiveness checks in tests.
    pub const ALL: [MessageType; 16] = [
        Self::AnnounceToken,
        Self::RequestToken,
        Self::TokenData,
        Self::Hello,
        Self::Ping,
        Self::Pong,
        Self::TransferEvent,
        Self::HolderUpdate,
        Self::TicketStamp,
        Self::ChatMessage,
        Self::ContentRequest,
        Self::ContentOffer,
        Self::BlockAnnounce,
        Self::TxRelay,
        Self::TxRequest,
        Self::TxResponse,
    ];
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// `ANNOUNCE_TOKEN` — a node tells the network about a token it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAnnounce {
    pub token_id: String,
    pub name: String,
    pub supply: u64,
    pub origin: String,
}

/// `REQUEST_TOKEN` — ask holders of a token to send `TOKEN_DATA`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub token_id: String,
}

/// `TOKEN_DATA` — full token metadata, answering a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenData {
    pub token_id: String,
    pub name: String,
    pub supply: u64,
    pub holders: u64,
    pub metadata: serde_json::Value,
}

/// `HELLO` — first message after joining the topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub agent: String,
    pub listen_port: u16,
}

/// `PING` / `PONG` liveness probes. The nonce correlates a pong with its
/// ping; nothing else reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp: u64,
    pub nonce: String,
}

/// `TRANSFER_EVENT` — a token transfer observed on the settlement chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub txid: String,
    pub token_id: String,
    pub from: String,
    pub to: String,
    pub amount: u64,
}

/// `HOLDER_UPDATE` — refreshed holder count for a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderUpdate {
    pub token_id: String,
    pub holders: u64,
}

/// `TICKET_STAMP` — proof a ticket token was redeemed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketStamp {
    pub ticket_id: String,
    pub token_id: String,
    pub stamped_by: String,
    pub stamped_at: u64,
}

/// `CHAT_MESSAGE` — one line in a public room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub room: String,
    pub from: String,
    pub text: String,
}

/// `CONTENT_REQUEST` — ask the network for a piece of content. A present
/// `payment_txid` means the requester already paid; serving that request
/// is mineable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRequest {
    pub content_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_txid: Option<String>,
}

/// `CONTENT_OFFER` — a node offering to serve content it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentOffer {
    pub content_id: String,
    pub price_sats: u64,
    pub endpoint: String,
}

/// `BLOCK_ANNOUNCE` — a freshly mined PoI block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockAnnounce {
    pub block: Block,
}

/// `TX_RELAY` — a raw settlement-chain transaction pushed to the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRelay {
    pub txid: String,
    pub raw_tx: String,
}

/// `TX_REQUEST` — ask peers for a raw transaction by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRequest {
    pub txid: String,
}

/// `TX_RESPONSE` — answer to a `TX_REQUEST`. `raw_tx` absent means the
/// responder does not have it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResponse {
    pub txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_tx: Option<String>,
}
