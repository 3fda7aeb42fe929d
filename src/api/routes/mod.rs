//! API Routes Module
//!
//! Route handlers organized by domain:
//! - health: health check, ETA defaults, recorded pushes
//! - transactions: deposit listings with projected status
//! - claims: manual claim and monitored transaction listing

pub mod claims;
pub mod health;
pub mod transactions;

use axum::{
    extract::{rejection::QueryRejection, Query},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use super::error::ApiError;
use super::middleware::{
    rate_limit_middleware, request_logging_middleware, security_headers_middleware,
};
use super::server::SharedAppState;
use super::websocket::{ws_address_handler, ws_all_handler};

/// Unwrap query parameters, turning a rejection into a validation error
pub(crate) fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(p)| p)
        .map_err(|e| ApiError::validation(e.body_text()))
}

/// Build the API router
pub fn create_router(state: SharedAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health::handle_health))
        .route("/api/estimate-time", get(health::handle_estimate_time))
        .route("/api/push-messages", get(health::handle_push_messages))
        .route("/api/transactions", get(transactions::handle_transactions))
        .route("/api/pending", get(transactions::handle_pending))
        .route("/api/not-ready", get(transactions::handle_not_ready))
        .route("/api/ready-pending", get(transactions::handle_ready_pending))
        .route("/api/monitored-txs", get(claims::handle_monitored_txs))
        .route("/api/manual-claim", post(claims::handle_manual_claim))
        .route("/ws/transactions", get(ws_all_handler))
        .route("/ws/transactions/:dest_addr", get(ws_address_handler))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(cors)
        .with_state(state)
}
