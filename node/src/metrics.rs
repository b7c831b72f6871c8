//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped at `/metrics` on the
//! metrics port. All metrics live in a dedicated registry under the
//! `p402` namespace so they never collide with a default-registry
//! consumer in the same process.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

pub type SharedMetrics = Arc<NodeMetrics>;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Gossip messages delivered to an observer.
    pub messages_received_total: IntCounter,
    /// Blocks mined by this node.
    pub blocks_mined_total: IntCounter,
    /// Blocks accepted from the network.
    pub blocks_received_total: IntCounter,
    /// Claim attempts that reached broadcast.
    pub claim_attempts_total: IntCounter,
    /// Claims accepted on chain.
    pub claims_succeeded_total: IntCounter,
    /// Work items currently in the mempool.
    pub mempool_depth: IntGauge,
    /// Peers with active connections.
    pub connected_peers: IntGauge,
    /// Chain tip height.
    pub chain_height: IntGauge,
    /// Display difficulty (leading zero hex chars of the target).
    pub difficulty: IntGauge,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("p402".into()), None)
            .expect("failed to create prometheus registry");

        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let c = IntCounter::new(name, help).expect("metric creation");
            registry.register(Box::new(c.clone())).expect("metric registration");
            c
        }

        fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
            let g = IntGauge::new(name, help).expect("metric creation");
            registry.register(Box::new(g.clone())).expect("metric registration");
            g
        }

        Self {
            messages_received_total: counter(
                &registry,
                "messages_received_total",
                "Gossip messages delivered to an observer",
            ),
            blocks_mined_total: counter(
                &registry,
                "blocks_mined_total",
                "Blocks mined by this node",
            ),
            blocks_received_total: counter(
                &registry,
                "blocks_received_total",
                "Blocks accepted from the network",
            ),
            claim_attempts_total: counter(
                &registry,
                "claim_attempts_total",
                "Claim pipeline invocations",
            ),
            claims_succeeded_total: counter(
                &registry,
                "claims_succeeded_total",
                "Claims accepted by the broadcast endpoint",
            ),
            mempool_depth: gauge(&registry, "mempool_depth", "Work items awaiting inclusion"),
            connected_peers: gauge(&registry, "connected_peers", "Peers with live connections"),
            chain_height: gauge(&registry, "chain_height", "Local chain tip height"),
            difficulty: gauge(
                &registry,
                "difficulty",
                "Leading zero hex chars of the current target",
            ),
            registry,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        if encoder.encode(&families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Axum handler for `GET /metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    (StatusCode::OK, metrics.render())
}
