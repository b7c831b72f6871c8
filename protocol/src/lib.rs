// Copyright (c) 2026 P402 Contributors. MIT License.
// See LICENSE for details.

//! # P402 Protocol — Core Library
//!
//! The engine room of a P402 node: a gossip overlay that propagates token
//! announcements, transfers, chat, and block announcements; a
//! Proof-of-Indexing miner that packages observed network work into local
//! blocks; and the claim pipeline that anchors each block's Merkle root
//! on the settlement chain.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of a
//! network participant:
//!
//! - **codec** — The gossip envelope: canonical JSON, fingerprints, relay
//!   accounting. No I/O, no clocks it doesn't borrow.
//! - **network** — libp2p transport, three-way discovery (mDNS, DHT
//!   rendezvous, bootstrap), the routing pipeline, typed dispatch, and
//!   per-peer reputation.
//! - **mining** — Work mempool, the chunked miner loop, and the shared
//!   difficulty adjuster that keeps the global block rate on target.
//! - **settlement** — OP_RETURN commitments: script building, raw
//!   transaction signing, broadcast with contention-aware retry.
//! - **storage** — Block structure and the sled-backed block store.
//! - **crypto** — SHA-256 helpers and the node identity keypair.
//! - **config** — Protocol constants and network parameters.
//!
//! ## Design stance
//!
//! 1. Every failure on the gossip path is a value, not a panic: drop,
//!    log, penalize, continue.
//! 2. Each shared structure owns its own guard. No global locks.
//! 3. Engines take bytes and return verdicts; sockets stay at the edge
//!    where they are testable by substitution.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod settlement;
pub mod storage;
pub mod util;
