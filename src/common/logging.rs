//! Structured Logging for the bridge backend
//!
//! Lifecycle events are emitted as JSON `LogEvent` records under
//! `xbridge::<category>` targets so they can be filtered and shipped as-is.
//!
//! # Usage
//!
//! ```rust,ignore
//! use xbridge::common::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true)?; // JSON mode for production
//! tracing::info!(target: "xbridge::api", request_id = %id, "Processing manual claim");
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// API request/response events
    Api,
    /// Exit roots applied to deposits
    Readiness,
    /// Claim transaction lifecycle
    ClaimTx,
    /// Projected status transitions
    Status,
    /// Push delivery
    Notify,
    /// System events (startup, shutdown)
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub message: String,
    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for error events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    /// Create a new log event
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: format!("{:?}", level).to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }

    /// Emit under the category target at `level`
    pub fn emit(&self, level: LogLevel) {
        let json = self.to_json();
        // tracing targets must be static, so dispatch per category
        macro_rules! emit_to {
            ($target:literal) => {
                match level {
                    LogLevel::Error => tracing::error!(target: $target, "{}", json),
                    LogLevel::Warn => tracing::warn!(target: $target, "{}", json),
                    LogLevel::Info => tracing::info!(target: $target, "{}", json),
                    LogLevel::Debug => tracing::debug!(target: $target, "{}", json),
                    LogLevel::Trace => tracing::trace!(target: $target, "{}", json),
                }
            };
        }
        match self.category {
            EventCategory::Api => emit_to!("xbridge::api"),
            EventCategory::Readiness => emit_to!("xbridge::readiness"),
            EventCategory::ClaimTx => emit_to!("xbridge::claimtx"),
            EventCategory::Status => emit_to!("xbridge::status"),
            EventCategory::Notify => emit_to!("xbridge::notify"),
            EventCategory::System => emit_to!("xbridge::system"),
        }
    }
}

// ============================================================================
// Event Helpers
// ============================================================================

/// Log an API request
pub fn log_api_request(method: &str, path: &str, client_ip: Option<&str>, correlation_id: &str) {
    LogEvent::new(LogLevel::Info, EventCategory::Api, format!("{} {}", method, path))
        .with_correlation_id(correlation_id)
        .with_data(serde_json::json!({
            "method": method,
            "path": path,
            "client_ip": client_ip
        }))
        .emit(LogLevel::Info);
}

/// Log an API response
pub fn log_api_response(
    method: &str,
    path: &str,
    status: u16,
    duration_ms: u64,
    correlation_id: &str,
) {
    let level = if status >= 500 {
        LogLevel::Error
    } else if status >= 400 {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };

    LogEvent::new(level, EventCategory::Api, format!("{} {} -> {}", method, path, status))
        .with_correlation_id(correlation_id)
        .with_duration(duration_ms)
        .with_data(serde_json::json!({
            "method": method,
            "path": path,
            "status": status
        }))
        .emit(level);
}

/// Log an exit root being applied to a network's deposits
pub fn log_readiness_event(network: u32, root: &str, updated: usize, error: Option<&str>) {
    let level = if error.is_some() { LogLevel::Error } else { LogLevel::Info };
    let mut event = LogEvent::new(level, EventCategory::Readiness, "exit_root_applied")
        .with_data(serde_json::json!({
            "network": network,
            "root": root,
            "updated": updated
        }));

    if let Some(err) = error {
        event = event.with_error("READINESS_ERROR", err);
    }

    // An idempotent re-apply that touches nothing is only interesting when debugging
    if updated == 0 && error.is_none() {
        event.emit(LogLevel::Debug);
    } else {
        event.emit(level);
    }
}

/// Log a claim transaction lifecycle step
pub fn log_claim_event(
    event_type: &str,
    deposit_id: &str,
    tx_hash: Option<&str>,
    success: bool,
    error: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, EventCategory::ClaimTx, event_type)
        .with_correlation_id(deposit_id)
        .with_data(serde_json::json!({
            "deposit_id": deposit_id,
            "tx_hash": tx_hash,
            "success": success
        }));

    if let Some(err) = error {
        event = event.with_error("CLAIM_TX_ERROR", err);
    }

    event.emit(level);
}

/// Log a projected status transition
pub fn log_status_transition(deposit_key: &str, old_status: &str, new_status: &str) {
    LogEvent::new(LogLevel::Info, EventCategory::Status, "status_transition")
        .with_correlation_id(deposit_key)
        .with_data(serde_json::json!({
            "old_status": old_status,
            "new_status": new_status
        }))
        .emit(LogLevel::Info);
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Minimum log level to output
/// * `json_format` - Use JSON format (recommended for production)
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = format!("{:?}", level).to_lowercase();
        EnvFilter::new(format!(
            "xbridge={level},tower_http={level},axum={level}",
            level = level
        ))
    });

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from BridgeConfig
pub fn init_from_config(config: &super::config::BridgeConfig) -> Result<(), LoggingError> {
    init_logging(LogLevel::from(config.log_level.as_str()), config.log_json)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Generate a unique correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let event = LogEvent::new(LogLevel::Info, EventCategory::ClaimTx, "claim_sent")
            .with_correlation_id("0/17")
            .with_data(serde_json::json!({"tx_hash": "0xabc"}))
            .with_duration(42);

        let json = event.to_json();
        assert!(json.contains("claim_sent"));
        assert!(json.contains("\"claim_tx\""));
        assert!(json.contains("0/17"));
        assert!(json.contains("42"));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let id1 = generate_correlation_id();
        let id2 = generate_correlation_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36);
    }
}
