//! API Server Module
//!
//! Application state shared by the handlers and the server startup logic.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::middleware::{RateLimitConfig, RateLimitState, RateLimiter};
use super::routes::create_router;
use super::service::BridgeService;
use crate::common::ApiConfig;
use crate::notify::{BroadcastNotifier, MemoryNotifier};

/// Combined application state for all API endpoints
pub struct AppState {
    pub service: BridgeService,
    /// Live status events for the WebSocket endpoints
    pub events: BroadcastNotifier,
    /// Recorded push messages, set when the fake push producer is enabled
    pub push_log: Option<Arc<MemoryNotifier>>,
    pub rate_limiter: RateLimitState,
}

/// Shared application state type
pub type SharedAppState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: &ApiConfig,
        service: BridgeService,
        events: BroadcastNotifier,
        push_log: Option<Arc<MemoryNotifier>>,
    ) -> SharedAppState {
        Arc::new(Self {
            service,
            events,
            push_log,
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::per_minute(
                config.rate_limit_per_min,
            ))),
        })
    }
}

/// Serve the API until `cancel` fires
pub async fn start_server(
    state: SharedAppState,
    port: u16,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = create_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("=== xbridge API ===");
    println!("Listening on http://{}", addr);
    println!();
    println!("Endpoints:");
    println!("  GET  /api/health             - Health check");
    println!("  GET  /api/transactions       - Deposits to an address");
    println!("  GET  /api/pending            - Unclaimed deposits to an address");
    println!("  GET  /api/not-ready          - Deposits waiting for an exit root");
    println!("  GET  /api/ready-pending      - Claimable deposits");
    println!("  GET  /api/monitored-txs      - Claim transactions by status");
    println!("  GET  /api/estimate-time      - Default claim ETAs");
    println!("  POST /api/manual-claim       - Claim an L1 deposit");
    println!("  GET  /api/push-messages      - Recorded push messages");
    println!("  WS   /ws/transactions        - All status events");
    println!("  WS   /ws/transactions/:addr  - Status events for an address");
    println!();

    // Forget idle rate limit clients once per window
    let limiter = state.rate_limiter.clone();
    let cleanup_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = cleanup_cancel.cancelled() => break,
                _ = ticker.tick() => limiter.cleanup().await,
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}
