//! API Layer Module
//!
//! HTTP server, routes, middleware, and WebSocket handlers.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod service;
pub mod websocket;

// Re-exports for convenience
pub use error::ApiError;
pub use middleware::{RateLimitConfig, RateLimitState, RateLimiter};
pub use routes::create_router;
pub use server::{start_server, AppState, SharedAppState};
pub use service::{BridgeService, EstimateView, MonitoredTxView, Page, TransactionView};
