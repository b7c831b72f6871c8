//! # HTTP Probe
//!
//! The node's outward HTTP surface is deliberately small: `GET /health`
//! for external tooling (dashboards, uptime monitors, the marketplace
//! page) and nothing else on this port. Metrics live on their own port.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state for the HTTP handlers. Cheap to clone;
/// everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Reported version string.
    pub version: String,
    /// Process start, for uptime.
    pub started_at: Instant,
    /// Milliseconds since epoch of the last block received from the
    /// network (0 until one arrives).
    pub last_sync_at: Arc<AtomicU64>,
}

/// Body of the `/health` response. Supply and holder figures come from
/// the token catalog when one is attached; a bare node reports zero for
/// both, and external tools treat that as "core only".
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub circulating_supply: u64,
    pub holder_count: u64,
    pub uptime_seconds: u64,
    pub last_sync_at: u64,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Builds the probe router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok",
        circulating_supply: 0,
        holder_count: 0,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        last_sync_at: state.last_sync_at.load(Ordering::Relaxed),
        version: state.version.clone(),
    };
    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        AppState {
            version: "0.1.0 (protocol 0.1.0)".to_string(),
            started_at: Instant::now(),
            last_sync_at: Arc::new(AtomicU64::new(0)),
        }
    }

    #[tokio::test]
    async fn health_reports_core_fields() {
        let state = test_state();
        state.last_sync_at.store(1_700_000_000_000, Ordering::Relaxed);

        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024 * 16)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["circulating_supply"], 0);
        assert_eq!(json["holder_count"], 0);
        assert_eq!(json["last_sync_at"], 1_700_000_000_000u64);
        assert!(json["version"].as_str().unwrap().contains("0.1.0"));
    }

    #[test]
    fn router_builds() {
        let _router = create_router(test_state());
    }
}
