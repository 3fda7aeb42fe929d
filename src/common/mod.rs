//! Common Infrastructure Module
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - The crate-wide error taxonomy

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{
    ApiConfig, BridgeConfig, ChainConfig, ClaimTxConfig, ConfigError, NotifyConfig,
    ReadinessConfig, StatusConfig, StoreConfig,
};
pub use error::{BridgeError, Precondition, Result};
pub use logging::{
    generate_correlation_id, init_from_config, init_logging, log_api_request, log_api_response,
    log_claim_event, log_readiness_event, log_status_transition, EventCategory, LogEvent,
    LogLevel, LoggingError,
};
